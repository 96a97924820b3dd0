//! Recursive process-tree termination: graceful signal, grace window, force.

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::tree::ProcessTree;
use crate::platform::{self, SignalOutcome, StopSignal};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const FORCE_SETTLE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationOutcome {
    /// The process was alive and is now gone.
    Terminated,
    /// The process did not exist when we looked.
    AlreadyGone,
    /// Still alive after the forced kill.
    Survived,
    /// PID 0, PID 1 or ourselves.
    Refused,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TerminationReport {
    pub pid: u32,
    pub outcome: TerminationOutcome,
    /// A forced kill was needed.
    pub forced: bool,
    /// Swallowed failures, in the order they happened.
    pub detail: Vec<String>,
}

impl TerminationReport {
    fn new(pid: u32, outcome: TerminationOutcome) -> Self {
        Self {
            pid,
            outcome,
            forced: false,
            detail: Vec::new(),
        }
    }

    /// The process is gone, whether we killed it or not.
    pub fn succeeded(&self) -> bool {
        matches!(
            self.outcome,
            TerminationOutcome::Terminated | TerminationOutcome::AlreadyGone
        )
    }
}

pub trait ProcessTerminator: Send + Sync {
    /// Terminate `pid` and all of its descendants. Never fails; the report
    /// says what happened.
    fn terminate(&self, pid: u32) -> impl Future<Output = TerminationReport> + Send;
}

#[derive(Debug, Clone)]
pub struct SystemTerminator {
    grace: Duration,
    signal_timeout: Duration,
    protected: BTreeSet<u32>,
}

impl SystemTerminator {
    pub fn new(grace: Duration, signal_timeout: Duration) -> Self {
        Self {
            grace,
            signal_timeout,
            protected: BTreeSet::from([0, 1, std::process::id()]),
        }
    }

    async fn signal_all(&self, pids: &[u32], signal: StopSignal, report: &mut TerminationReport) {
        for &pid in pids {
            match platform::send_signal(pid, signal, self.signal_timeout).await {
                SignalOutcome::Sent | SignalOutcome::NoSuchProcess => {}
                SignalOutcome::Failed(e) => {
                    report.detail.push(format!("{:?} to {} failed: {}", signal, pid, e));
                }
            }
        }
    }
}

async fn snapshot() -> ProcessTree {
    tokio::task::spawn_blocking(ProcessTree::snapshot)
        .await
        .unwrap_or_default()
}

/// Poll until every PID is dead or the window closes; returns survivors.
async fn wait_for_exit(pids: &BTreeSet<u32>, window: Duration) -> BTreeSet<u32> {
    let deadline = Instant::now() + window;
    loop {
        let alive: BTreeSet<u32> = pids
            .iter()
            .copied()
            .filter(|p| platform::is_process_alive(*p))
            .collect();
        if alive.is_empty() || Instant::now() >= deadline {
            return alive;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

impl ProcessTerminator for SystemTerminator {
    async fn terminate(&self, pid: u32) -> TerminationReport {
        if self.protected.contains(&pid) {
            warn!(pid, "refusing to terminate protected process");
            return TerminationReport::new(pid, TerminationOutcome::Refused);
        }
        if !platform::is_process_alive(pid) {
            return TerminationReport::new(pid, TerminationOutcome::AlreadyGone);
        }

        let mut report = TerminationReport::new(pid, TerminationOutcome::Terminated);
        let mut order = snapshot().await.descendants(pid);
        order.retain(|p| !self.protected.contains(p));
        order.push(pid);
        debug!(pid, tree = ?order, "terminating process tree");

        self.signal_all(&order, StopSignal::Graceful, &mut report).await;
        let targets: BTreeSet<u32> = order.iter().copied().collect();
        let mut survivors = wait_for_exit(&targets, self.grace).await;
        if survivors.is_empty() {
            return report;
        }

        // Children may have forked during the grace window.
        if survivors.contains(&pid) {
            survivors.extend(snapshot().await.descendants(pid));
            survivors.retain(|p| !self.protected.contains(p));
        }
        warn!(pid, survivors = ?survivors, "grace window elapsed, forcing");
        report.forced = true;
        let mut force_order: Vec<u32> = survivors.iter().copied().filter(|p| *p != pid).collect();
        if survivors.contains(&pid) {
            force_order.push(pid);
        }
        self.signal_all(&force_order, StopSignal::Force, &mut report).await;

        let remaining = wait_for_exit(&survivors, FORCE_SETTLE).await;
        if remaining.contains(&pid) {
            report.outcome = TerminationOutcome::Survived;
        }
        let stragglers: Vec<u32> = remaining.into_iter().filter(|p| *p != pid).collect();
        if !stragglers.is_empty() {
            report
                .detail
                .push(format!("descendants still alive: {:?}", stragglers));
        }
        report
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn terminator(grace_ms: u64) -> SystemTerminator {
        SystemTerminator::new(Duration::from_millis(grace_ms), Duration::from_secs(5))
    }

    #[test]
    fn succeeded_covers_gone_and_terminated() {
        assert!(TerminationReport::new(1, TerminationOutcome::Terminated).succeeded());
        assert!(TerminationReport::new(1, TerminationOutcome::AlreadyGone).succeeded());
        assert!(!TerminationReport::new(1, TerminationOutcome::Survived).succeeded());
        assert!(!TerminationReport::new(1, TerminationOutcome::Refused).succeeded());
    }

    #[tokio::test]
    async fn refuses_protected_pids() {
        let t = terminator(100);
        for pid in [0, 1, std::process::id()] {
            let report = t.terminate(pid).await;
            assert_eq!(report.outcome, TerminationOutcome::Refused, "pid {}", pid);
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_pid_is_already_gone() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        let report = terminator(100).terminate(pid).await;
        assert_eq!(report.outcome, TerminationOutcome::AlreadyGone);
        assert!(report.succeeded());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cooperative_process_exits_on_sigterm() {
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let report = terminator(2000).terminate(child.id()).await;
        let _ = child.wait();
        assert_eq!(report.outcome, TerminationOutcome::Terminated);
        assert!(!report.forced);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn sigterm_ignoring_process_is_forced() {
        let mut child = std::process::Command::new("sh")
            .arg("-c")
            .arg("trap '' TERM; sleep 30")
            .spawn()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let report = terminator(300).terminate(child.id()).await;
        let _ = child.wait();
        assert_eq!(report.outcome, TerminationOutcome::Terminated);
        assert!(report.forced);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn grandchildren_are_terminated() {
        let mut child = std::process::Command::new("sh")
            .arg("-c")
            .arg("sleep 30 & sleep 30 & wait")
            .spawn()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        let grandchildren = ProcessTree::snapshot().descendants(child.id());
        assert_eq!(grandchildren.len(), 2, "{:?}", grandchildren);

        let report = terminator(2000).terminate(child.id()).await;
        let _ = child.wait();
        assert!(report.succeeded(), "{:?}", report);
        for pid in grandchildren {
            assert!(!platform::is_process_alive(pid), "grandchild {} survived", pid);
        }
    }
}
