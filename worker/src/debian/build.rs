use crate::debian::{DebUpdateChangelog, MAX_BUILD_ITERATIONS};
use crate::tee::CopyOutput;
use breezyshim::tree::WorkingTree;
use janitor::api::worker::{DebianBuildConfig, WorkerFailure};
use ognibuild::session::plain::PlainSession;
#[cfg(target_os = "linux")]
use ognibuild::session::schroot::SchrootSession;
use ognibuild::session::Session;
use std::path::Path;

#[derive(Debug, serde::Serialize)]
pub struct DebianBuildResult {
    pub changes_names: Vec<String>,
    pub lintian: Option<serde_json::Value>,
}

fn session_setup_failure(description: String) -> WorkerFailure {
    WorkerFailure {
        code: "session-setup-failure".to_string(),
        description,
        details: None,
        stage: vec!["session-setup".to_string()],
        transient: None,
    }
}

fn start_session(chroot: Option<&str>) -> Result<Box<dyn Session>, WorkerFailure> {
    #[cfg(target_os = "linux")]
    {
        if let Some(chroot) = chroot {
            return SchrootSession::new(chroot, Some("janitor-worker"))
                .map(|s| Box::new(s) as Box<dyn Session>)
                .map_err(|e| session_setup_failure(e.to_string()));
        }
    }
    #[cfg(not(target_os = "linux"))]
    if chroot.is_some() {
        return Err(WorkerFailure {
            code: "chroot-not-supported".to_string(),
            description: "Chroot is not supported on this platform".to_string(),
            details: None,
            stage: vec!["session-setup".to_string()],
            transient: None,
        });
    }
    Ok(Box::new(PlainSession::new()) as Box<dyn Session>)
}

/// Run one dpkg-buildpackage-style attempt and classify the outcome from the
/// captured build log, the way sbuild's own wrapper would.
fn build_once(
    local_tree: &WorkingTree,
    subpath: &Path,
    output_directory: &Path,
    build_command: &str,
    attempt: usize,
) -> Result<Vec<String>, WorkerFailure> {
    let log_path = output_directory.join(format!("build-attempt-{}.log", attempt));
    let working_dir = local_tree.abspath(subpath).unwrap();

    let status = {
        let _redirect = CopyOutput::new(&log_path, false).map_err(|e| WorkerFailure {
            code: "io-error".to_string(),
            description: format!("Unable to open build log: {}", e),
            details: None,
            stage: vec!["build".to_string()],
            transient: None,
        })?;
        std::process::Command::new("sh")
            .arg("-c")
            .arg(build_command)
            .current_dir(&working_dir)
            .status()
    };

    let final_log = output_directory.join("build.log");
    if let Ok(contents) = std::fs::read(&log_path) {
        std::fs::write(&final_log, &contents).ok();
    }

    match status {
        Ok(status) if status.success() => {
            let changes_names = std::fs::read_dir(&working_dir)
                .into_iter()
                .flatten()
                .filter_map(|e| e.ok())
                .filter_map(|e| e.file_name().into_string().ok())
                .filter(|n| n.ends_with(".changes"))
                .collect::<Vec<_>>();
            if changes_names.is_empty() {
                return Err(WorkerFailure {
                    code: "build-missing-changes".to_string(),
                    description: "Expected a .changes file to be produced".to_string(),
                    details: None,
                    stage: vec!["build".to_string()],
                    transient: None,
                });
            }
            Ok(changes_names)
        }
        Ok(_status) => {
            let log_bytes = std::fs::read(&final_log).unwrap_or_default();
            let sbuildlog = buildlog_consultant::sbuild::SbuildLog::try_from(std::io::Cursor::new(
                log_bytes,
            ));

            let (code, description, details, stage) = if let Ok(sbuildlog) = sbuildlog.as_ref() {
                let failure = buildlog_consultant::sbuild::worker_failure_from_sbuild_log(sbuildlog);
                match (failure.error.as_ref(), failure.stage.as_ref()) {
                    (Some(error), Some(stage)) => (
                        if error.is_universal() {
                            error.kind().to_string()
                        } else {
                            format!("{}-{}", stage, error.kind())
                        },
                        error.to_string(),
                        Some(error.json()),
                        vec!["build".to_string(), stage.to_string()],
                    ),
                    (Some(error), None) => (
                        error.kind().to_string(),
                        error.to_string(),
                        Some(error.json()),
                        vec!["build".to_string()],
                    ),
                    (None, Some(stage)) => (
                        format!("build-failed-stage-{}", stage),
                        "Build failed".to_string(),
                        None,
                        vec!["build".to_string(), stage.to_string()],
                    ),
                    (None, None) => (
                        "build-failed".to_string(),
                        "Build failed".to_string(),
                        None,
                        vec!["build".to_string()],
                    ),
                }
            } else {
                (
                    "build-failed".to_string(),
                    "Build failed".to_string(),
                    None,
                    vec!["build".to_string()],
                )
            };

            Err(WorkerFailure {
                code,
                description,
                details,
                stage,
                transient: None,
            })
        }
        Err(e) => Err(WorkerFailure {
            code: "build-failed".to_string(),
            description: format!("Unable to run build command: {}", e),
            details: None,
            stage: vec!["build".to_string()],
            transient: None,
        }),
    }
}

/// True if the classified failure looks like a missing build dependency the
/// installer might resolve before the next attempt.
fn is_missing_dependency(failure: &WorkerFailure) -> bool {
    failure.code.ends_with("missing-dependency") || failure.code == "unsatisfied-apt-dependencies"
}

fn requirement_from_failure(failure: &WorkerFailure) -> Option<String> {
    let details = failure.details.as_ref()?;
    details
        .get("package")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

#[allow(clippy::too_many_arguments)]
pub fn build(
    local_tree: &WorkingTree,
    subpath: &Path,
    output_directory: &Path,
    committer: Option<&str>,
    _update_changelog: DebUpdateChangelog,
    config: &DebianBuildConfig,
) -> Result<DebianBuildResult, WorkerFailure> {
    if !local_tree.has_filename(&subpath.join("debian/changelog")) {
        return Err(WorkerFailure {
            code: "missing-changelog".to_string(),
            description: "Missing changelog".to_string(),
            details: None,
            stage: vec!["pre-check".to_string()],
            transient: None,
        });
    }

    let session = start_session(config.chroot.as_deref())?;

    if let Err(e) = ognibuild::debian::satisfy_build_deps(session.as_ref(), local_tree, subpath) {
        log::warn!(
            "Ignoring error installing declared build dependencies: {}",
            e
        );
    }

    let build_command = config
        .build_command
        .clone()
        .unwrap_or_else(|| "dpkg-buildpackage -us -uc".to_string());

    let mut last_err = None;
    for attempt in 1..=MAX_BUILD_ITERATIONS {
        match build_once(local_tree, subpath, output_directory, &build_command, attempt) {
            Ok(changes_names) => {
                let lintian = crate::debian::lintian::run_lintian(
                    output_directory.to_str().unwrap(),
                    changes_names.iter().map(|s| s.as_str()).collect(),
                    config.lintian.profile.as_deref(),
                    config
                        .lintian
                        .suppress_tags
                        .as_ref()
                        .map(|v| v.iter().map(|s| s.as_str()).collect()),
                )
                .ok();
                let _ = committer;
                return Ok(DebianBuildResult {
                    changes_names,
                    lintian,
                });
            }
            Err(failure) => {
                if attempt < MAX_BUILD_ITERATIONS && is_missing_dependency(&failure) {
                    if let Some(package) = requirement_from_failure(&failure) {
                        let installed = ognibuild::debian::apt::run_apt(
                            session.as_ref(),
                            vec!["install", "-y", package.as_str()],
                            vec![],
                        )
                        .is_ok();
                        if installed {
                            last_err = Some(failure);
                            continue;
                        }
                    }
                }
                return Err(failure);
            }
        }
    }

    Err(last_err.unwrap_or(WorkerFailure {
        code: "build-failed".to_string(),
        description: format!(
            "Build did not succeed after {} iterations",
            MAX_BUILD_ITERATIONS
        ),
        details: None,
        stage: vec!["build".to_string()],
        transient: None,
    }))
}
