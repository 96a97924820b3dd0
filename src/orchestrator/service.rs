use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::model::{BuildConfig, ServiceConfig};
use crate::config::resolve_service_dir;

/// Static identity of a managed service.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSpec {
    pub name: String,
    pub port: u16,
    pub command: String,
    pub working_dir: PathBuf,
    pub env: BTreeMap<String, String>,
    pub build: Option<BuildConfig>,
}

impl ServiceSpec {
    pub fn from_config(name: &str, config: &ServiceConfig, config_dir: &Path) -> Self {
        Self {
            name: name.to_string(),
            port: config.port,
            command: config.command.clone(),
            working_dir: resolve_service_dir(config_dir, config.path.as_deref()),
            env: config.env.clone(),
            build: config.build.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServicePhase {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl std::fmt::Display for ServicePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServicePhase::Stopped => "stopped",
            ServicePhase::Starting => "starting",
            ServicePhase::Running => "running",
            ServicePhase::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// How a spawned process ended, as published by its monitor task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitState {
    /// Exit code, `None` when killed by a signal.
    Exited(Option<i32>),
    WaitFailed(String),
}

impl std::fmt::Display for ExitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitState::Exited(Some(code)) => write!(f, "exited with code {}", code),
            ExitState::Exited(None) => write!(f, "killed by signal"),
            ExitState::WaitFailed(e) => write!(f, "wait failed: {}", e),
        }
    }
}

/// A process this controller spawned.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    started: Instant,
    started_at: DateTime<Local>,
    exit: watch::Receiver<Option<ExitState>>,
}

impl ProcessHandle {
    pub fn new(pid: u32, exit: watch::Receiver<Option<ExitState>>) -> Self {
        Self {
            pid,
            started: Instant::now(),
            started_at: Local::now(),
            exit,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// `None` while the process is running. A monitor that vanished without
    /// reporting counts as an exit.
    pub fn exit_state(&self) -> Option<ExitState> {
        if let Some(state) = self.exit.borrow().clone() {
            return Some(state);
        }
        if self.exit.has_changed().is_err() {
            return Some(ExitState::WaitFailed("monitor gone".to_string()));
        }
        None
    }

    pub fn is_running(&self) -> bool {
        self.exit_state().is_none()
    }

    /// Wait up to `window` for the exit event; true if the process exited.
    pub async fn wait_exit(&mut self, window: Duration) -> bool {
        match tokio::time::timeout(window, self.exit.wait_for(|s| s.is_some())).await {
            Ok(_) => true,
            Err(_) => false,
        }
    }
}

/// One configured service and its at most one live process.
#[derive(Debug)]
pub struct ManagedService {
    pub spec: ServiceSpec,
    pub phase: ServicePhase,
    pub handle: Option<ProcessHandle>,
}

impl ManagedService {
    pub fn new(spec: ServiceSpec) -> Self {
        Self {
            spec,
            phase: ServicePhase::Stopped,
            handle: None,
        }
    }

    /// Clear the handle if its process has exited on its own.
    pub fn reap(&mut self) -> Option<ExitState> {
        let state = self.handle.as_ref()?.exit_state()?;
        if let Some(handle) = self.handle.take() {
            let name = &self.spec.name;
            match state {
                ExitState::Exited(Some(0)) => info!(service = %name, pid = handle.pid(), "process exited"),
                _ => warn!(service = %name, pid = handle.pid(), %state, "process exited unexpectedly"),
            }
        }
        self.phase = ServicePhase::Stopped;
        Some(state)
    }

    pub fn own_pid(&self) -> Option<u32> {
        self.handle.as_ref().filter(|h| h.is_running()).map(|h| h.pid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ServiceSpec {
        ServiceSpec {
            name: "backend".into(),
            port: 5050,
            command: "node server.js".into(),
            working_dir: PathBuf::from("."),
            env: BTreeMap::new(),
            build: None,
        }
    }

    #[test]
    fn spec_from_config_resolves_path() {
        let config = ServiceConfig {
            path: Some("../backend".into()),
            command: "node server.js".into(),
            port: 5050,
            env: BTreeMap::new(),
            build: None,
        };
        let spec = ServiceSpec::from_config("backend", &config, Path::new("/srv/app/launcher"));
        assert_eq!(spec.working_dir, PathBuf::from("/srv/app/launcher/../backend"));
        assert_eq!(spec.port, 5050);
    }

    #[tokio::test]
    async fn handle_reports_exit() {
        let (tx, rx) = watch::channel(None);
        let mut handle = ProcessHandle::new(42, rx);
        assert!(handle.is_running());
        assert!(!handle.wait_exit(Duration::from_millis(10)).await);

        tx.send(Some(ExitState::Exited(Some(1)))).unwrap();
        assert!(handle.wait_exit(Duration::from_millis(10)).await);
        assert_eq!(handle.exit_state(), Some(ExitState::Exited(Some(1))));
    }

    #[tokio::test]
    async fn dropped_monitor_counts_as_exit() {
        let (tx, rx) = watch::channel(None);
        let mut handle = ProcessHandle::new(42, rx);
        drop(tx);
        assert!(!handle.is_running());
        assert!(handle.wait_exit(Duration::from_millis(10)).await);
    }

    #[test]
    fn reap_clears_exited_handle() {
        let (tx, rx) = watch::channel(None);
        let mut svc = ManagedService::new(spec());
        svc.handle = Some(ProcessHandle::new(42, rx));
        svc.phase = ServicePhase::Running;

        assert_eq!(svc.reap(), None);
        assert_eq!(svc.own_pid(), Some(42));

        tx.send(Some(ExitState::Exited(None))).unwrap();
        assert_eq!(svc.reap(), Some(ExitState::Exited(None)));
        assert!(svc.handle.is_none());
        assert_eq!(svc.phase, ServicePhase::Stopped);
    }

    #[test]
    fn phase_display() {
        assert_eq!(ServicePhase::Running.to_string(), "running");
        assert_eq!(ServicePhase::Stopped.to_string(), "stopped");
    }
}
