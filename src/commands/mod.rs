pub mod init;
pub mod lifecycle;
pub mod ports;
pub mod shell;
pub mod status;
pub mod validate;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use crate::config;
use crate::config::model::PortrigConfig;
use crate::config::resolve::resolve_config;
use crate::orchestrator::SystemController;
use crate::ui::logs::{self, LogWriter};

/// How long output forwarders may keep draining after shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// A resolved and validated configuration.
pub struct Workspace {
    pub config: PortrigConfig,
    pub config_path: PathBuf,
}

impl Workspace {
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let config_path = resolve_config(config_file)?;
        let (config, source) = config::load_config(&config_path)?;
        if let Err(errors) = config::validate::validate(&config, &source, &file_name(&config_path)) {
            let count = errors.len();
            for err in errors {
                let report: miette::Report = err.into();
                eprintln!("{:?}", report);
            }
            anyhow::bail!("{} has {} configuration error(s)", config_path.display(), count);
        }
        Ok(Self {
            config,
            config_path,
        })
    }

    pub fn config_dir(&self) -> &Path {
        self.config_path.parent().unwrap_or(Path::new("."))
    }
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| config::CONFIG_FILENAME.to_string())
}

/// A controller wired to the real system, with child output printed to the
/// terminal.
pub struct Runtime {
    pub controller: SystemController,
    tracker: TaskTracker,
    writer: JoinHandle<()>,
}

impl Runtime {
    pub fn new(workspace: &Workspace) -> Self {
        let (sink, rx) = logs::channel();
        let writer = LogWriter::new(rx, workspace.config.services.keys().map(String::as_str));
        let writer = tokio::spawn(writer.run());
        let tracker = TaskTracker::new();
        let controller =
            SystemController::from_config(&workspace.config, workspace.config_dir(), sink, tracker.clone());
        Self {
            controller,
            tracker,
            writer,
        }
    }

    /// Drop the controller and let the output forwarders finish.
    pub async fn close(self) {
        let Runtime {
            controller,
            tracker,
            writer,
        } = self;
        drop(controller);
        tracker.close();
        if tokio::time::timeout(DRAIN_TIMEOUT, tracker.wait()).await.is_err() {
            tracing::debug!("output forwarders still running, abandoning them");
            writer.abort();
            return;
        }
        let _ = writer.await;
    }
}
