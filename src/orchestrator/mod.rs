pub mod build;
pub mod launcher;
pub mod ports;
pub mod reclaim;
pub mod service;
pub mod sweep;
pub mod terminate;
pub mod tree;

use std::collections::BTreeSet;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::model::{PortrigConfig, SweepConfig, TimingConfig};
use crate::platform::SignalOutcome;
use crate::stats::{ProcessStats, StatsSource, SystemMemory};
use crate::ui::logs::LogSink;

use launcher::{LaunchError, ProcessLauncher, SystemLauncher};
use ports::{PortInspection, PortInspector, SystemPortInspector};
use reclaim::{PortReclaimer, ReclaimPolicy, ReclaimReport};
use service::{ExitState, ManagedService, ServicePhase, ServiceSpec};
use sweep::SweepReport;
use terminate::{ProcessTerminator, SystemTerminator, TerminationReport};
use tree::ProcessTree;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("unknown service `{name}`{}", did_you_mean(.suggestion))]
    UnknownService {
        name: String,
        suggestion: Option<String>,
    },

    #[error("failed to start `{service}`: {source}")]
    Launch {
        service: String,
        #[source]
        source: LaunchError,
    },
}

fn did_you_mean(suggestion: &Option<String>) -> String {
    suggestion
        .as_ref()
        .map(|s| format!(", did you mean `{}`?", s))
        .unwrap_or_default()
}

fn find_closest_match<'a>(name: &str, candidates: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    let mut best: Option<(&str, f64)> = None;
    for candidate in candidates {
        let score = strsim::jaro_winkler(name, candidate);
        if score >= 0.8 && best.is_none_or(|(_, s)| score > s) {
            best = Some((candidate, score));
        }
    }
    best.map(|(name, _)| name)
}

// ---------------------------------------------------------------------------
// Operation reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StartReport {
    pub service: String,
    pub port: u16,
    pub pid: u32,
    /// Our previous process for this service, stopped first.
    pub replaced: Option<StopReport>,
    pub reclaim: ReclaimReport,
    /// Second reclaim after `kill_wait`, when the first left listeners.
    pub retry_reclaim: Option<ReclaimReport>,
    /// Listeners outside our process tree after the settle window.
    pub foreign: BTreeSet<u32>,
    pub verification: PortInspection,
    /// Set if the process died before verification.
    #[serde(skip)]
    pub exited_early: Option<ExitState>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StopReport {
    pub service: String,
    pub port: u16,
    pub stopped_pid: Option<u32>,
    /// Exited within the graceful window.
    pub graceful: bool,
    pub forced: Option<TerminationReport>,
    pub reclaim: ReclaimReport,
    pub remaining: PortInspection,
}

#[derive(Debug)]
pub struct RestartReport {
    pub stops: Vec<StopReport>,
    pub reclaims: Vec<ReclaimReport>,
    pub sweep: Option<SweepReport>,
    pub starts: Vec<Result<StartReport, ControlError>>,
}

#[derive(Debug)]
pub struct ShutdownReport {
    pub stops: Vec<StopReport>,
    pub reclaims: Vec<ReclaimReport>,
    pub sweep: Option<SweepReport>,
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PortState {
    /// Our own process holds the service.
    Running,
    /// Someone else listens on the port.
    Foreign,
    Stopped,
    /// No own process and the port could not be inspected.
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub name: String,
    pub port: u16,
    pub phase: ServicePhase,
    pub state: PortState,
    pub own_pid: Option<u32>,
    pub uptime_secs: Option<u64>,
    pub listeners: PortInspection,
    pub foreign: BTreeSet<u32>,
    pub stats: ProcessStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub services: Vec<ServiceStatus>,
    pub memory: SystemMemory,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub type SystemController = Controller<SystemPortInspector, SystemTerminator, SystemLauncher>;

/// Owns every managed service and drives it between "exclusively bound" and
/// "port free". Operations run one at a time.
pub struct Controller<I, T, L> {
    services: Vec<ManagedService>,
    reclaimer: PortReclaimer<I, T>,
    launcher: L,
    timing: TimingConfig,
    sweep: SweepConfig,
}

impl SystemController {
    pub fn from_config(
        config: &PortrigConfig,
        config_dir: &Path,
        sink: LogSink,
        tracker: TaskTracker,
    ) -> Self {
        let timing = config.timing.clone();
        let specs = config
            .services
            .iter()
            .map(|(name, svc)| ServiceSpec::from_config(name, svc, config_dir))
            .collect();
        Controller::new(
            specs,
            SystemPortInspector::new(timing.query_timeout),
            SystemTerminator::new(timing.term_grace, timing.query_timeout),
            SystemLauncher::new(sink, tracker, timing.query_timeout),
            timing,
            config.sweep.clone(),
        )
    }
}

async fn snapshot_tree() -> ProcessTree {
    tokio::task::spawn_blocking(ProcessTree::snapshot)
        .await
        .unwrap_or_default()
}

impl<I, T, L> Controller<I, T, L>
where
    I: PortInspector,
    T: ProcessTerminator,
    L: ProcessLauncher,
{
    pub fn new(
        specs: Vec<ServiceSpec>,
        inspector: I,
        terminator: T,
        launcher: L,
        timing: TimingConfig,
        sweep: SweepConfig,
    ) -> Self {
        let policy = ReclaimPolicy::from(&timing);
        Self {
            services: specs.into_iter().map(ManagedService::new).collect(),
            reclaimer: PortReclaimer::new(inspector, terminator, policy),
            launcher,
            timing,
            sweep,
        }
    }

    /// Service specs in start order.
    pub fn specs(&self) -> impl Iterator<Item = &ServiceSpec> {
        self.services.iter().map(|s| &s.spec)
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    pub fn reclaimer(&self) -> &PortReclaimer<I, T> {
        &self.reclaimer
    }

    pub fn phase(&mut self, name: &str) -> Result<ServicePhase, ControlError> {
        let idx = self.index_of(name)?;
        self.services[idx].reap();
        Ok(self.services[idx].phase)
    }

    pub fn own_pid(&mut self, name: &str) -> Result<Option<u32>, ControlError> {
        let idx = self.index_of(name)?;
        self.services[idx].reap();
        Ok(self.services[idx].own_pid())
    }

    fn index_of(&self, name: &str) -> Result<usize, ControlError> {
        self.services
            .iter()
            .position(|s| s.spec.name == name)
            .ok_or_else(|| ControlError::UnknownService {
                name: name.to_string(),
                suggestion: find_closest_match(name, self.services.iter().map(|s| s.spec.name.as_str()))
                    .map(str::to_string),
            })
    }

    // -- queries ------------------------------------------------------------

    pub async fn inspect(&self, name: &str) -> Result<PortInspection, ControlError> {
        let idx = self.index_of(name)?;
        Ok(self.reclaimer.inspector().inspect(self.services[idx].spec.port).await)
    }

    pub async fn status<S: StatsSource>(&mut self, stats: &S) -> StatusSnapshot {
        stats.refresh().await;
        let tree = snapshot_tree().await;
        let mut statuses = Vec::with_capacity(self.services.len());

        for svc in &mut self.services {
            svc.reap();
            let own_pid = svc.own_pid();
            let listeners = self.reclaimer.inspector().inspect(svc.spec.port).await;
            let own_tree = own_pid.map(|pid| tree.subtree(pid)).unwrap_or_default();
            let foreign: BTreeSet<u32> = listeners.pids().difference(&own_tree).copied().collect();

            let state = if own_pid.is_some() {
                PortState::Running
            } else if !foreign.is_empty() {
                PortState::Foreign
            } else if !listeners.is_known() {
                PortState::Unknown
            } else {
                PortState::Stopped
            };
            let counted: Vec<u32> = match state {
                PortState::Running => own_tree.iter().copied().collect(),
                PortState::Foreign => foreign.iter().copied().collect(),
                _ => Vec::new(),
            };

            statuses.push(ServiceStatus {
                name: svc.spec.name.clone(),
                port: svc.spec.port,
                phase: svc.phase,
                state,
                own_pid,
                uptime_secs: svc.handle.as_ref().map(|h| h.uptime().as_secs()),
                listeners,
                foreign,
                stats: stats.aggregate(&counted),
            });
        }

        StatusSnapshot {
            services: statuses,
            memory: stats.system_memory(),
        }
    }

    // -- single-service operations -------------------------------------------

    pub async fn start(&mut self, name: &str) -> Result<StartReport, ControlError> {
        let idx = self.index_of(name)?;
        self.start_at(idx).await
    }

    pub async fn stop(&mut self, name: &str) -> Result<StopReport, ControlError> {
        let idx = self.index_of(name)?;
        Ok(self.stop_at(idx).await)
    }

    /// Reclaim a service's port without touching its phase.
    pub async fn clear_port(&mut self, name: &str) -> Result<ReclaimReport, ControlError> {
        let idx = self.index_of(name)?;
        Ok(self.reclaimer.reclaim(self.services[idx].spec.port).await)
    }

    async fn start_at(&mut self, idx: usize) -> Result<StartReport, ControlError> {
        self.services[idx].reap();
        let spec = self.services[idx].spec.clone();
        let port = spec.port;
        info!(service = %spec.name, port, "starting");

        let replaced = if self.services[idx].handle.is_some() {
            Some(self.stop_at(idx).await)
        } else {
            None
        };
        self.services[idx].phase = ServicePhase::Starting;

        let reclaim = self.reclaimer.reclaim(port).await;
        let retry_reclaim = if reclaim.freed {
            None
        } else {
            tokio::time::sleep(self.timing.kill_wait).await;
            Some(self.reclaimer.reclaim(port).await)
        };

        let handle = match self.launcher.launch(&spec).await {
            Ok(handle) => handle,
            Err(source) => {
                error!(service = %spec.name, error = %source, "launch failed");
                let svc = &mut self.services[idx];
                svc.handle = None;
                svc.phase = ServicePhase::Stopped;
                return Err(ControlError::Launch {
                    service: spec.name,
                    source,
                });
            }
        };
        let pid = handle.pid();
        self.services[idx].handle = Some(handle);
        self.services[idx].phase = ServicePhase::Running;

        tokio::time::sleep(self.timing.start_wait).await;
        let exited_early = self.services[idx].reap();

        let verification = self.reclaimer.inspector().inspect(port).await;
        let own_tree = snapshot_tree().await.subtree(pid);
        let foreign: BTreeSet<u32> = verification.pids().difference(&own_tree).copied().collect();

        if let Some(state) = &exited_early {
            warn!(service = %spec.name, pid, %state, "process exited during startup");
        } else if !foreign.is_empty() {
            warn!(service = %spec.name, port, pid, foreign = ?foreign, "port also held by a foreign process");
        } else if verification.pids().is_empty() {
            debug!(service = %spec.name, port, %verification, "not listening yet");
        } else {
            info!(service = %spec.name, port, pid, "running");
        }

        Ok(StartReport {
            service: spec.name,
            port,
            pid,
            replaced,
            reclaim,
            retry_reclaim,
            foreign,
            verification,
            exited_early,
        })
    }

    async fn stop_at(&mut self, idx: usize) -> StopReport {
        self.services[idx].reap();
        self.services[idx].phase = ServicePhase::Stopping;
        let name = self.services[idx].spec.name.clone();
        let port = self.services[idx].spec.port;

        let mut stopped_pid = None;
        let mut graceful = false;
        let mut forced = None;

        if let Some(mut handle) = self.services[idx].handle.take() {
            let pid = handle.pid();
            stopped_pid = Some(pid);
            info!(service = %name, pid, "stopping");
            match self.launcher.interrupt(&handle).await {
                SignalOutcome::Failed(e) => debug!(service = %name, pid, error = %e, "interrupt failed"),
                outcome => debug!(service = %name, pid, ?outcome, "interrupt sent"),
            }
            if handle.wait_exit(self.timing.graceful_wait).await {
                graceful = true;
            } else {
                warn!(service = %name, pid, "did not exit in time, killing process tree");
                forced = Some(self.reclaimer.terminator().terminate(pid).await);
            }
        }

        let reclaim = self.reclaimer.reclaim(port).await;
        self.services[idx].phase = ServicePhase::Stopped;

        let remaining = self.reclaimer.inspector().inspect(port).await;
        if remaining.is_occupied() {
            warn!(service = %name, port, remaining = %remaining, "port still occupied after stop");
        } else {
            info!(service = %name, port, "stopped");
        }

        StopReport {
            service: name,
            port,
            stopped_pid,
            graceful,
            forced,
            reclaim,
            remaining,
        }
    }

    // -- whole-system operations ---------------------------------------------

    pub async fn start_all(&mut self) -> Vec<Result<StartReport, ControlError>> {
        let mut results = Vec::with_capacity(self.services.len());
        for idx in 0..self.services.len() {
            results.push(self.start_at(idx).await);
        }
        results
    }

    pub async fn stop_all(&mut self) -> Vec<StopReport> {
        let mut reports = Vec::with_capacity(self.services.len());
        for idx in (0..self.services.len()).rev() {
            reports.push(self.stop_at(idx).await);
        }
        reports
    }

    async fn reclaim_all(&self) -> Vec<ReclaimReport> {
        let mut reports = Vec::with_capacity(self.services.len());
        for svc in &self.services {
            reports.push(self.reclaimer.reclaim(svc.spec.port).await);
        }
        reports
    }

    async fn run_sweep(&self) -> Option<SweepReport> {
        if !self.sweep.enabled || self.sweep.names.is_empty() {
            return None;
        }
        Some(sweep::sweep(self.reclaimer.terminator(), &self.sweep.names).await)
    }

    pub async fn restart(&mut self) -> RestartReport {
        info!("restarting all services");
        let stops = self.stop_all().await;
        let reclaims = self.reclaim_all().await;
        let sweep = self.run_sweep().await;
        tokio::time::sleep(self.timing.kill_wait).await;
        let starts = self.start_all().await;
        RestartReport {
            stops,
            reclaims,
            sweep,
            starts,
        }
    }

    pub async fn shutdown(&mut self) -> ShutdownReport {
        info!("shutting down");
        let stops = self.stop_all().await;
        let reclaims = self.reclaim_all().await;
        let sweep = self.run_sweep().await;
        ShutdownReport {
            stops,
            reclaims,
            sweep,
        }
    }
}
