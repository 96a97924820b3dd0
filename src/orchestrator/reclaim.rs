use std::collections::BTreeSet;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::ports::{PortInspection, PortInspector};
use super::terminate::{ProcessTerminator, TerminationReport};
use crate::config::model::TimingConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReclaimPolicy {
    pub max_attempts: u32,
    pub attempt_delay: Duration,
}

impl Default for ReclaimPolicy {
    fn default() -> Self {
        Self::from(&TimingConfig::default())
    }
}

impl From<&TimingConfig> for ReclaimPolicy {
    fn from(timing: &TimingConfig) -> Self {
        Self {
            max_attempts: timing.max_kill_attempts,
            attempt_delay: timing.kill_wait,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReclaimReport {
    pub port: u16,
    /// Every PID a termination was requested for, across all attempts.
    pub targeted: BTreeSet<u32>,
    /// Termination rounds performed.
    pub attempts: u32,
    pub freed: bool,
    pub terminations: Vec<TerminationReport>,
    /// The inspection the verdict is based on.
    pub last_inspection: PortInspection,
}

/// Drives a port to the "no listeners" state: inspect, terminate every
/// listener, wait, re-inspect, with a bounded number of rounds.
pub struct PortReclaimer<I, T> {
    inspector: I,
    terminator: T,
    policy: ReclaimPolicy,
}

impl<I: PortInspector, T: ProcessTerminator> PortReclaimer<I, T> {
    pub fn new(inspector: I, terminator: T, policy: ReclaimPolicy) -> Self {
        Self {
            inspector,
            terminator,
            policy,
        }
    }

    pub fn inspector(&self) -> &I {
        &self.inspector
    }

    pub fn terminator(&self) -> &T {
        &self.terminator
    }

    pub async fn reclaim(&self, port: u16) -> ReclaimReport {
        let mut inspection = self.inspector.inspect(port).await;
        let mut report = ReclaimReport {
            port,
            targeted: BTreeSet::new(),
            attempts: 0,
            freed: false,
            terminations: Vec::new(),
            last_inspection: inspection.clone(),
        };

        while report.attempts < self.policy.max_attempts {
            let pids = inspection.pids();
            if pids.is_empty() {
                break;
            }
            report.attempts += 1;
            info!(port, attempt = report.attempts, pids = ?pids, "reclaiming port");
            for pid in pids {
                report.targeted.insert(pid);
                let termination = self.terminator.terminate(pid).await;
                if !termination.succeeded() {
                    debug!(port, pid, outcome = ?termination.outcome, "termination did not succeed");
                }
                report.terminations.push(termination);
            }
            tokio::time::sleep(self.policy.attempt_delay).await;
            inspection = self.inspector.inspect(port).await;
        }

        report.freed = inspection.pids().is_empty();
        report.last_inspection = inspection;
        if !report.freed {
            warn!(
                port,
                attempts = report.attempts,
                remaining = %report.last_inspection,
                "port still occupied after reclaim"
            );
        }
        report
    }
}
