//! VCS manager abstraction used by the publisher, worker and runner to locate
//! and open the on-disk (or remote) git/bzr storage for a codebase.
//!
//! Codebases are stored either under a local directory (one managed by
//! git-store/bzr-store) or behind a remote HTTP(S) root; [`VcsManager`]
//! hides that distinction behind `{root}/{codebase}`-style URL construction.

use crate::config::Config;
use std::collections::HashMap;
use std::path::PathBuf;
use url::Url;

/// The kind of version control system a branch or repository uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum VcsType {
    /// Git.
    Git,
    /// Bazaar.
    Bzr,
}

impl std::fmt::Display for VcsType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            VcsType::Git => write!(f, "git"),
            VcsType::Bzr => write!(f, "bzr"),
        }
    }
}

impl std::str::FromStr for VcsType {
    type Err = UnsupportedVcs;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "git" => Ok(VcsType::Git),
            "bzr" => Ok(VcsType::Bzr),
            n => Err(UnsupportedVcs(n.to_string())),
        }
    }
}

/// A VCS name that isn't one of the types the janitor knows how to store.
#[derive(Debug, Clone)]
pub struct UnsupportedVcs(pub String);

impl std::fmt::Display for UnsupportedVcs {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "unsupported VCS type: {}", self.0)
    }
}

impl std::error::Error for UnsupportedVcs {}

/// Raised when a branch could not be opened.
#[derive(Debug, Clone)]
pub struct BranchOpenFailure {
    /// A short machine-readable failure code, e.g. `branch-missing`.
    pub code: String,
    /// A human-readable description of the failure.
    pub description: String,
    /// How long to wait before retrying, if the failure is transient.
    pub retry_after: Option<chrono::Duration>,
}

impl std::fmt::Display for BranchOpenFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.description)
    }
}

impl std::error::Error for BranchOpenFailure {}

/// Open a branch, translating VCS-layer errors into [`BranchOpenFailure`].
///
/// This wraps `silver_platter::vcs::open_branch`, which already knows how to
/// probe for the right VCS implementation and retry transient forge errors.
pub fn open_branch_ext(
    url: &Url,
    possible_transports: Option<&mut Vec<breezyshim::transport::Transport>>,
    _probers: Option<&[String]>,
) -> Result<Box<dyn breezyshim::branch::Branch>, BranchOpenFailure> {
    match silver_platter::vcs::open_branch(url, possible_transports, None, None) {
        Ok(branch) => Ok(branch),
        Err(silver_platter::vcs::BranchOpenError::Missing { description, .. }) => {
            Err(BranchOpenFailure {
                code: "branch-missing".to_string(),
                description,
                retry_after: None,
            })
        }
        Err(silver_platter::vcs::BranchOpenError::RateLimited { description, .. }) => {
            Err(BranchOpenFailure {
                code: "rate-limited-temporarily".to_string(),
                description,
                retry_after: None,
            })
        }
        Err(silver_platter::vcs::BranchOpenError::TemporarilyUnavailable { description, .. }) => {
            Err(BranchOpenFailure {
                code: "branch-temporarily-unavailable".to_string(),
                description,
                retry_after: None,
            })
        }
        Err(silver_platter::vcs::BranchOpenError::Unavailable { description, .. }) => {
            Err(BranchOpenFailure {
                code: "branch-unavailable".to_string(),
                description,
                retry_after: None,
            })
        }
        Err(silver_platter::vcs::BranchOpenError::Unsupported { description, .. }) => {
            Err(BranchOpenFailure {
                code: "branch-unsupported-vcs".to_string(),
                description,
                retry_after: None,
            })
        }
        Err(silver_platter::vcs::BranchOpenError::Other(description)) => Err(BranchOpenFailure {
            code: "branch-open-error".to_string(),
            description,
            retry_after: None,
        }),
    }
}

/// Determine the VCS type of an already-opened branch.
///
/// Branches don't carry an explicit type tag; this asks breezy for the
/// control directory format it would use to clone the branch and classifies
/// it from the format name (git formats are named `git`/`git-bare`, bzr
/// formats are named e.g. `2a`).
pub fn get_branch_vcs_type(
    branch: &dyn breezyshim::branch::Branch,
) -> Result<VcsType, UnsupportedVcs> {
    let format_name = branch.controldir().cloning_metadir().to_string();
    if format_name.contains("git") {
        Ok(VcsType::Git)
    } else {
        Ok(VcsType::Bzr)
    }
}

/// Maps codebases onto the repositories and branches that store their
/// janitor-managed history.
pub trait VcsManager: Send + Sync {
    /// VCS type managed.
    fn vcs_type(&self) -> VcsType;

    /// URL of a named branch for a codebase.
    fn get_branch_url(&self, codebase: &str, branch_name: &str) -> Url;

    /// URL of the repository that stores a codebase's history.
    fn get_repository_url(&self, codebase: &str) -> Url;

    /// List the codebases this manager currently has repositories for.
    fn list_repositories(&self) -> Vec<String>;
}

/// A git manager backed by a local directory of colocated repositories.
#[derive(Debug, Clone)]
pub struct LocalGitVcsManager {
    base_path: PathBuf,
}

impl LocalGitVcsManager {
    /// Create a new manager rooted at `base_path`.
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    /// The root directory repositories are stored under.
    pub fn base_path(&self) -> &std::path::Path {
        &self.base_path
    }
}

impl VcsManager for LocalGitVcsManager {
    fn vcs_type(&self) -> VcsType {
        VcsType::Git
    }

    fn get_branch_url(&self, codebase: &str, branch_name: &str) -> Url {
        colocated_branch_url(&self.get_repository_url(codebase), branch_name)
    }

    fn get_repository_url(&self, codebase: &str) -> Url {
        Url::from_directory_path(self.base_path.join(codebase))
            .expect("base_path must be an absolute path")
    }

    fn list_repositories(&self) -> Vec<String> {
        list_directory_names(&self.base_path)
    }
}

/// Build the URL for a colocated branch within a git repository, using the
/// `,branch=<name>` segment parameter breezy understands.
fn colocated_branch_url(repo_url: &Url, branch_name: &str) -> Url {
    let (base_url, mut params) = breezyshim::urlutils::split_segment_parameters(
        &repo_url.to_string().trim_end_matches('/').parse().unwrap(),
    );
    params.insert(
        "branch".to_owned(),
        breezyshim::urlutils::escape_utf8(branch_name, Some("")),
    );
    breezyshim::urlutils::join_segment_parameters(&base_url, params)
}

/// A git manager backed by a remote HTTP(S) root, as served by git-store.
#[derive(Debug, Clone)]
pub struct RemoteGitVcsManager {
    base_url: Url,
}

impl RemoteGitVcsManager {
    /// Create a new manager rooted at `base_url`.
    pub fn new(base_url: Url) -> Self {
        Self { base_url }
    }

    /// The root URL repositories are served from.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

impl VcsManager for RemoteGitVcsManager {
    fn vcs_type(&self) -> VcsType {
        VcsType::Git
    }

    fn get_branch_url(&self, codebase: &str, branch_name: &str) -> Url {
        colocated_branch_url(&self.get_repository_url(codebase), branch_name)
    }

    fn get_repository_url(&self, codebase: &str) -> Url {
        self.base_url
            .join(&format!("{}/", codebase))
            .expect("codebase name must be a valid URL segment")
    }

    fn list_repositories(&self) -> Vec<String> {
        Vec::new()
    }
}

/// A bzr manager backed by a local directory of per-codebase stacked branches.
#[derive(Debug, Clone)]
pub struct LocalBzrVcsManager {
    base_path: PathBuf,
}

impl LocalBzrVcsManager {
    /// Create a new manager rooted at `base_path`.
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    /// The root directory repositories are stored under.
    pub fn base_path(&self) -> &std::path::Path {
        &self.base_path
    }
}

impl VcsManager for LocalBzrVcsManager {
    fn vcs_type(&self) -> VcsType {
        VcsType::Bzr
    }

    fn get_branch_url(&self, codebase: &str, branch_name: &str) -> Url {
        let mut path = self.base_path.join(codebase);
        if !branch_name.is_empty() {
            path = path.join(branch_name);
        }
        Url::from_directory_path(path).expect("base_path must be an absolute path")
    }

    fn get_repository_url(&self, codebase: &str) -> Url {
        Url::from_directory_path(self.base_path.join(codebase))
            .expect("base_path must be an absolute path")
    }

    fn list_repositories(&self) -> Vec<String> {
        list_directory_names(&self.base_path)
    }
}

/// A bzr manager backed by a remote HTTP(S) root, as served by bzr-store.
#[derive(Debug, Clone)]
pub struct RemoteBzrVcsManager {
    base_url: Url,
}

impl RemoteBzrVcsManager {
    /// Create a new manager rooted at `base_url`.
    pub fn new(base_url: Url) -> Self {
        Self { base_url }
    }

    /// The root URL repositories are served from.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

impl VcsManager for RemoteBzrVcsManager {
    fn vcs_type(&self) -> VcsType {
        VcsType::Bzr
    }

    fn get_branch_url(&self, codebase: &str, branch_name: &str) -> Url {
        let repo_url = self.get_repository_url(codebase);
        if branch_name.is_empty() {
            repo_url
        } else {
            repo_url
                .join(&format!("{}/", branch_name))
                .expect("branch name must be a valid URL segment")
        }
    }

    fn get_repository_url(&self, codebase: &str) -> Url {
        self.base_url
            .join(&format!("{}/", codebase))
            .expect("codebase name must be a valid URL segment")
    }

    fn list_repositories(&self) -> Vec<String> {
        Vec::new()
    }
}

fn list_directory_names(base_path: &std::path::Path) -> Vec<String> {
    std::fs::read_dir(base_path)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.path().is_dir())
                .filter_map(|entry| entry.file_name().into_string().ok())
                .collect()
        })
        .unwrap_or_default()
}

fn make_vcs_manager(vcs_type: VcsType, location: &str) -> Box<dyn VcsManager> {
    if !location.contains(':') {
        let path = PathBuf::from(location);
        match vcs_type {
            VcsType::Git => Box::new(LocalGitVcsManager::new(path)),
            VcsType::Bzr => Box::new(LocalBzrVcsManager::new(path)),
        }
    } else {
        let url = Url::parse(location).expect("vcs_location segment must be a valid URL");
        match vcs_type {
            VcsType::Git => Box::new(RemoteGitVcsManager::new(url)),
            VcsType::Bzr => Box::new(RemoteBzrVcsManager::new(url)),
        }
    }
}

/// Build the git/bzr managers described by `location`.
///
/// `location` is either a bare root (in which case `{location}/git` and
/// `{location}/bzr` are used) or a `name=location,name=location` list
/// selecting the storage for each VCS type explicitly.
pub fn get_vcs_managers(location: &str) -> Result<HashMap<VcsType, Box<dyn VcsManager>>, UnsupportedVcs> {
    let mut managers = HashMap::new();
    if !location.contains('=') {
        let location = location.trim_end_matches('/');
        managers.insert(
            VcsType::Git,
            make_vcs_manager(VcsType::Git, &format!("{}/git", location)),
        );
        managers.insert(
            VcsType::Bzr,
            make_vcs_manager(VcsType::Bzr, &format!("{}/bzr", location)),
        );
    } else {
        for part in location.split(',') {
            let (name, path) = part
                .split_once('=')
                .ok_or_else(|| UnsupportedVcs(part.to_string()))?;
            let vcs_type: VcsType = name.parse()?;
            managers.insert(vcs_type, make_vcs_manager(vcs_type, path));
        }
    }
    Ok(managers)
}

/// Build the VCS managers configured in `config.vcs_location`.
///
/// Returns an empty map if no location is configured.
pub fn get_vcs_managers_from_config(
    config: &Config,
) -> Result<HashMap<VcsType, Box<dyn VcsManager>>, UnsupportedVcs> {
    match config.vcs_location.as_ref() {
        Some(location) => get_vcs_managers(location),
        None => Ok(HashMap::new()),
    }
}

pub fn is_authenticated_url(url: &url::Url) -> bool {
    ["git+ssh", "bzr+ssh"].contains(&url.scheme())
}

#[cfg(test)]
mod is_authenticated_url_tests {
    #[test]
    fn test_simple() {
        assert!(super::is_authenticated_url(
            &url::Url::parse("git+ssh://example.com").unwrap()
        ));
        assert!(super::is_authenticated_url(
            &url::Url::parse("bzr+ssh://example.com").unwrap()
        ));
        assert!(!super::is_authenticated_url(
            &url::Url::parse("http://example.com").unwrap()
        ));
    }
}

#[cfg(test)]
mod vcs_manager_tests {
    use super::*;

    #[test]
    fn test_local_git_branch_url() {
        let manager = LocalGitVcsManager::new(PathBuf::from("/srv/vcs"));
        let url = manager.get_branch_url("my-package", "lintian-fixes/main");
        assert!(url.to_string().starts_with("file:///srv/vcs/my-package"));
    }

    #[test]
    fn test_remote_git_repository_url() {
        let manager = RemoteGitVcsManager::new(Url::parse("https://vcs.example.com/").unwrap());
        assert_eq!(
            manager.get_repository_url("my-package").as_str(),
            "https://vcs.example.com/my-package/"
        );
    }

    #[test]
    fn test_get_vcs_managers_bare_root() {
        let managers = get_vcs_managers("https://vcs.example.com").unwrap();
        assert!(managers.contains_key(&VcsType::Git));
        assert!(managers.contains_key(&VcsType::Bzr));
    }

    #[test]
    fn test_get_vcs_managers_explicit() {
        let managers =
            get_vcs_managers("git=https://git.example.com,bzr=https://bzr.example.com").unwrap();
        assert_eq!(managers.len(), 2);
    }

    #[test]
    fn test_vcs_type_from_str() {
        assert_eq!("git".parse::<VcsType>().unwrap(), VcsType::Git);
        assert_eq!("BZR".parse::<VcsType>().unwrap(), VcsType::Bzr);
        assert!("cvs".parse::<VcsType>().is_err());
    }
}
