use async_trait::async_trait;
use std::io;
use std::path::Path;

mod local;
pub use local::LocalArtifactManager;

#[cfg(feature = "gcs")]
mod gcs;
#[cfg(feature = "gcs")]
pub use gcs::GCSArtifactManager;

#[derive(Debug)]
pub enum Error {
    ServiceUnavailable,
    ArtifactsMissing,
    IoError(io::Error),
    Other(String),
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::IoError(e)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::ServiceUnavailable => write!(f, "Service unavailable"),
            Error::ArtifactsMissing => write!(f, "Artifacts missing"),
            Error::IoError(e) => write!(f, "I/O error: {}", e),
            Error::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {}

#[async_trait]
pub trait ArtifactManager: Send + Sync {
    async fn store_artifacts(
        &self,
        run_id: &str,
        local_path: &Path,
        names: Option<&[String]>,
    ) -> Result<(), Error>;

    async fn get_artifact(
        &self,
        run_id: &str,
        filename: &str,
    ) -> Result<Box<dyn std::io::Read + Send + Sync>, Error>;

    fn public_artifact_url(&self, run_id: &str, filename: &str) -> url::Url;

    async fn retrieve_artifacts(
        &self,
        run_id: &str,
        local_path: &Path,
        filter_fn: Option<&(dyn for<'a> Fn(&'a str) -> bool + Sync + Send)>,
    ) -> Result<(), Error>;

    async fn iter_ids(&self) -> Box<dyn Iterator<Item = String> + Send>;

    async fn delete_artifacts(&self, run_id: &str) -> Result<(), Error>;
}

/// Create an artifact manager based on the location string.
pub async fn create_artifact_manager(location: &str) -> Result<Box<dyn ArtifactManager>, Error> {
    if location.starts_with("gs://") {
        #[cfg(feature = "gcs")]
        {
            let url = location
                .parse::<url::Url>()
                .map_err(|e| Error::Other(e.to_string()))?;
            Ok(Box::new(GCSArtifactManager::from_url(&url, None).await?))
        }
        #[cfg(not(feature = "gcs"))]
        {
            Err(Error::Other("GCS support not compiled in".to_string()))
        }
    } else {
        let path = location.trim_start_matches("file://");
        Ok(Box::new(LocalArtifactManager::new(Path::new(path))?))
    }
}
