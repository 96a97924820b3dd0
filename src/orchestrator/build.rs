//! Production build gate for preview services: run the build, then refuse to
//! serve an artifact that still references the dev server.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use super::launcher::{forward_output, LaunchError};
use super::service::ServiceSpec;
use crate::config::model::BuildConfig;
use crate::platform::{self, StopSignal};
use crate::ui::logs::LogSink;

pub async fn run_build(
    spec: &ServiceSpec,
    build: &BuildConfig,
    sink: &LogSink,
    tracker: &TaskTracker,
) -> Result<(), LaunchError> {
    info!(service = %spec.name, command = %build.command, "building");

    let mut cmd = platform::shell_command(&build.command);
    cmd.current_dir(&spec.working_dir)
        .envs(&spec.env)
        .envs(&build.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    platform::configure_process_group(&mut cmd);

    let mut child = cmd.spawn().map_err(|source| LaunchError::BuildSpawn {
        command: build.command.clone(),
        source,
    })?;
    forward_output(&mut child, &format!("{}:build", spec.name), sink, tracker);

    match tokio::time::timeout(build.timeout, child.wait()).await {
        Ok(Ok(status)) if status.success() => {}
        Ok(Ok(status)) => {
            return Err(LaunchError::BuildFailed {
                command: build.command.clone(),
                code: status.code(),
            })
        }
        Ok(Err(source)) => {
            return Err(LaunchError::BuildSpawn {
                command: build.command.clone(),
                source,
            })
        }
        Err(_) => {
            if let Some(pid) = child.id() {
                platform::signal_group(pid, StopSignal::Force, std::time::Duration::from_secs(5)).await;
            }
            let _ = child.kill().await;
            return Err(LaunchError::BuildTimedOut {
                command: build.command.clone(),
                timeout: build.timeout,
            });
        }
    }

    let entry = artifact_path(&spec.working_dir, build);
    check_artifact(&entry, &build.dev_markers).await?;
    info!(service = %spec.name, artifact = %entry.display(), "build ok");
    Ok(())
}

pub fn artifact_path(working_dir: &Path, build: &BuildConfig) -> PathBuf {
    working_dir.join(&build.output_dir).join(&build.entry)
}

/// Markers present in the artifact, in configuration order.
pub fn find_dev_markers(content: &str, markers: &[String]) -> Vec<String> {
    markers
        .iter()
        .filter(|m| !m.is_empty() && content.contains(m.as_str()))
        .cloned()
        .collect()
}

/// An unreadable artifact cannot be proven bad, so it only warns.
pub async fn check_artifact(path: &Path, markers: &[String]) -> Result<(), LaunchError> {
    let content = match tokio::fs::read(path).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            warn!(artifact = %path.display(), error = %e, "cannot read build artifact, skipping dev-marker check");
            return Ok(());
        }
    };
    let found = find_dev_markers(&content, markers);
    if found.is_empty() {
        Ok(())
    } else {
        Err(LaunchError::DevArtifact {
            path: path.to_path_buf(),
            markers: found,
        })
    }
}
