//! CPU and memory figures for the status view. Purely informational: a PID
//! that vanished simply contributes zeros.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use sysinfo::{Pid, System};

/// Gap between the two CPU samples; sysinfo needs two refreshes to compute
/// a usage percentage.
const CPU_SAMPLE_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ProcessStats {
    pub cpu_percent: f32,
    pub memory_bytes: u64,
}

impl std::ops::Add for ProcessStats {
    type Output = ProcessStats;

    fn add(self, rhs: ProcessStats) -> ProcessStats {
        ProcessStats {
            cpu_percent: self.cpu_percent + rhs.cpu_percent,
            memory_bytes: self.memory_bytes + rhs.memory_bytes,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SystemMemory {
    pub total_bytes: u64,
    pub used_bytes: u64,
}

pub trait StatsSource: Send + Sync {
    /// Take a fresh sample. Called once per status view, before the
    /// per-PID lookups.
    fn refresh(&self) -> impl Future<Output = ()> + Send {
        async {}
    }

    fn stats_for(&self, pid: u32) -> ProcessStats;

    fn aggregate(&self, pids: &[u32]) -> ProcessStats {
        pids.iter()
            .map(|pid| self.stats_for(*pid))
            .fold(ProcessStats::default(), |acc, s| acc + s)
    }

    fn system_memory(&self) -> SystemMemory;
}

pub struct SysinfoStats {
    system: Mutex<System>,
}

impl Default for SysinfoStats {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoStats {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    fn with_system(&self, f: impl FnOnce(&mut System)) {
        if let Ok(mut system) = self.system.lock() {
            f(&mut system);
        }
    }
}

impl StatsSource for SysinfoStats {
    async fn refresh(&self) {
        self.with_system(|system| system.refresh_processes());
        tokio::time::sleep(CPU_SAMPLE_INTERVAL).await;
        self.with_system(|system| {
            system.refresh_processes();
            system.refresh_memory();
        });
    }

    fn stats_for(&self, pid: u32) -> ProcessStats {
        let Ok(system) = self.system.lock() else {
            return ProcessStats::default();
        };
        system
            .process(Pid::from_u32(pid))
            .map(|p| ProcessStats {
                cpu_percent: p.cpu_usage(),
                memory_bytes: p.memory(),
            })
            .unwrap_or_default()
    }

    fn system_memory(&self) -> SystemMemory {
        let Ok(system) = self.system.lock() else {
            return SystemMemory::default();
        };
        SystemMemory {
            total_bytes: system.total_memory(),
            used_bytes: system.used_memory(),
        }
    }
}

/// `512 KB`, `12.3 MB`, `1.50 GB`.
pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    let b = bytes as f64;
    if b >= GB {
        format!("{:.2} GB", b / GB)
    } else if b >= MB {
        format!("{:.1} MB", b / MB)
    } else {
        format!("{:.0} KB", b / KB)
    }
}


#[cfg(test)]
mod tests {
    use super::fake::FakeStats;
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn aggregate_sums_and_ignores_missing() {
        let stats = FakeStats {
            per_pid: BTreeMap::from([
                (10, ProcessStats { cpu_percent: 1.5, memory_bytes: 1000 }),
                (11, ProcessStats { cpu_percent: 2.0, memory_bytes: 500 }),
            ]),
            memory: SystemMemory::default(),
        };
        let total = stats.aggregate(&[10, 11, 999]);
        assert_eq!(total.memory_bytes, 1500);
        assert!((total.cpu_percent - 3.5).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn vanished_pid_is_zero() {
        let stats = SysinfoStats::new();
        stats.refresh().await;
        assert_eq!(stats.stats_for(u32::MAX - 1), ProcessStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_sleeps_on_the_runtime_clock() {
        let stats = SysinfoStats::new();
        let started = tokio::time::Instant::now();
        stats.refresh().await;
        assert!(started.elapsed() >= CPU_SAMPLE_INTERVAL);
    }

    #[tokio::test]
    async fn own_process_has_memory() {
        let stats = SysinfoStats::new();
        stats.refresh().await;
        assert!(stats.stats_for(std::process::id()).memory_bytes > 0);
        let mem = stats.system_memory();
        assert!(mem.total_bytes >= mem.used_bytes);
        assert!(mem.total_bytes > 0);
    }

    #[test]
    fn bytes_are_humanized() {
        assert_eq!(format_bytes(512 * 1024), "512 KB");
        assert_eq!(format_bytes(12 * 1024 * 1024 + 300 * 1024), "12.3 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024 / 2), "1.50 GB");
        assert_eq!(format_bytes(0), "0 KB");
    }
}
