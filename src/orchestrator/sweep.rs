//! Best-effort cleanup by process name.
//!
//! This is deliberately imprecise: it will also hit unrelated processes that
//! happen to share a name (another project's `node`, say). It only runs on
//! restart and exit, after port-based reclaim has already done the real work.

use std::collections::BTreeSet;
use std::path::Path;

use serde::Serialize;
use sysinfo::System;
use tracing::{debug, info};

use super::terminate::{ProcessTerminator, TerminationReport};
use super::tree::ProcessTree;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub matched: BTreeSet<u32>,
    pub terminations: Vec<TerminationReport>,
}

impl SweepReport {
    pub fn failures(&self) -> usize {
        self.terminations.iter().filter(|t| !t.succeeded()).count()
    }
}

/// A row of the process table, as far as the sweep cares.
#[derive(Debug, Clone)]
pub struct ProcessEntry {
    pub pid: u32,
    pub name: String,
    pub cmd: Vec<String>,
}

fn file_name(s: &str) -> &str {
    Path::new(s)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(s)
}

/// True if the executable name, or the file name of any argument, equals
/// one of `names` (ASCII case-insensitive).
pub fn matches_any(entry: &ProcessEntry, names: &[String]) -> bool {
    let hit = |candidate: &str| names.iter().any(|n| n.eq_ignore_ascii_case(candidate));
    hit(&entry.name) || entry.cmd.iter().any(|arg| hit(file_name(arg)))
}

/// PIDs to sweep, excluding everything in `protected`.
pub fn select_targets(
    entries: &[ProcessEntry],
    names: &[String],
    protected: &BTreeSet<u32>,
) -> BTreeSet<u32> {
    entries
        .iter()
        .filter(|e| !protected.contains(&e.pid) && matches_any(e, names))
        .map(|e| e.pid)
        .collect()
}

fn snapshot() -> (Vec<ProcessEntry>, BTreeSet<u32>) {
    let mut system = System::new();
    system.refresh_processes();
    let entries = system
        .processes()
        .iter()
        .map(|(pid, p)| ProcessEntry {
            pid: pid.as_u32(),
            name: p.name().to_string(),
            cmd: p.cmd().to_vec(),
        })
        .collect();

    let me = std::process::id();
    let mut protected: BTreeSet<u32> = ProcessTree::from_system(&system)
        .ancestors(me)
        .into_iter()
        .collect();
    protected.extend([0, 1, me]);
    (entries, protected)
}

pub async fn sweep<T: ProcessTerminator>(terminator: &T, names: &[String]) -> SweepReport {
    let (entries, protected) = tokio::task::spawn_blocking(snapshot)
        .await
        .unwrap_or_default();
    let matched = select_targets(&entries, names, &protected);
    if matched.is_empty() {
        debug!("sweep found nothing");
        return SweepReport::default();
    }

    info!(count = matched.len(), "sweeping leftover processes by name");
    let mut report = SweepReport {
        matched: matched.clone(),
        terminations: Vec::new(),
    };
    for pid in matched {
        report.terminations.push(terminator.terminate(pid).await);
    }
    if report.failures() > 0 {
        debug!(failures = report.failures(), "sweep left some processes behind");
    }
    report
}
