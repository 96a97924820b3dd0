//! Which OS processes hold a listening TCP port.
//!
//! Every call re-queries the OS; nothing is cached.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use tokio::process::Command;
use tracing::debug;

use crate::platform;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PortInspection {
    /// Zero or more PIDs listening on the port.
    Listeners { pids: BTreeSet<u32> },
    /// Every query method failed; the port may or may not be free.
    Unknown { reason: String },
}

impl PortInspection {
    pub fn listeners(pids: impl IntoIterator<Item = u32>) -> Self {
        PortInspection::Listeners {
            pids: pids.into_iter().collect(),
        }
    }

    pub fn free() -> Self {
        Self::listeners([])
    }

    /// PIDs known to listen. `Unknown` yields the empty set.
    pub fn pids(&self) -> BTreeSet<u32> {
        match self {
            PortInspection::Listeners { pids } => pids.clone(),
            PortInspection::Unknown { .. } => BTreeSet::new(),
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, PortInspection::Listeners { .. })
    }

    /// Known to have listeners.
    pub fn is_occupied(&self) -> bool {
        matches!(self, PortInspection::Listeners { pids } if !pids.is_empty())
    }
}

impl std::fmt::Display for PortInspection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortInspection::Listeners { pids } if pids.is_empty() => write!(f, "free"),
            PortInspection::Listeners { pids } => write!(f, "{}", join_pids(pids)),
            PortInspection::Unknown { reason } => write!(f, "unknown ({})", reason),
        }
    }
}

pub fn join_pids(pids: &BTreeSet<u32>) -> String {
    pids.iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub trait PortInspector: Send + Sync {
    fn inspect(&self, port: u16) -> impl Future<Output = PortInspection> + Send;

    /// Listening PIDs, with query failure reported as "no listeners".
    fn listening_pids(&self, port: u16) -> impl Future<Output = BTreeSet<u32>> + Send {
        async move { self.inspect(port).await.pids() }
    }
}

/// Queries the host with lsof / ss / procfs (Unix) or netstat (Windows).
#[derive(Debug, Clone)]
pub struct SystemPortInspector {
    query_timeout: Duration,
}

impl SystemPortInspector {
    pub fn new(query_timeout: Duration) -> Self {
        Self { query_timeout }
    }

    async fn query(&self, cmd: Command) -> Result<std::process::Output, String> {
        platform::run_captured(cmd, self.query_timeout).await
    }

    #[cfg(unix)]
    async fn lsof(&self, port: u16) -> Result<BTreeSet<u32>, String> {
        let mut cmd = Command::new("lsof");
        cmd.arg("-nP")
            .arg("-t")
            .arg(format!("-iTCP:{}", port))
            .arg("-sTCP:LISTEN");
        let output = self.query(cmd).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        // lsof exits 1 when nothing matches.
        if output.status.success() || (output.status.code() == Some(1) && stdout.trim().is_empty())
        {
            Ok(parse_pid_lines(&stdout))
        } else {
            Err(format!(
                "exit {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            ))
        }
    }

    #[cfg(unix)]
    async fn ss(&self, port: u16) -> Result<BTreeSet<u32>, String> {
        let mut cmd = Command::new("ss");
        cmd.arg("-Hltnp")
            .arg("sport")
            .arg("=")
            .arg(format!(":{}", port));
        let output = self.query(cmd).await?;
        if !output.status.success() {
            return Err(format!(
                "exit {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        parse_ss(&String::from_utf8_lossy(&output.stdout), port)
    }

    #[cfg(windows)]
    async fn netstat(&self, port: u16) -> Result<BTreeSet<u32>, String> {
        let mut cmd = Command::new("netstat");
        cmd.arg("-ano").arg("-p").arg("TCP");
        let output = self.query(cmd).await?;
        if !output.status.success() {
            return Err(format!("exit {:?}", output.status.code()));
        }
        Ok(parse_netstat(&String::from_utf8_lossy(&output.stdout), port))
    }
}

impl PortInspector for SystemPortInspector {
    async fn inspect(&self, port: u16) -> PortInspection {
        let mut failures = Vec::new();

        #[cfg(unix)]
        {
            match self.lsof(port).await {
                Ok(pids) => return PortInspection::Listeners { pids },
                Err(e) => failures.push(format!("lsof: {}", e)),
            }
            match self.ss(port).await {
                Ok(pids) => return PortInspection::Listeners { pids },
                Err(e) => failures.push(format!("ss: {}", e)),
            }
        }

        #[cfg(windows)]
        {
            match self.netstat(port).await {
                Ok(pids) => return PortInspection::Listeners { pids },
                Err(e) => failures.push(format!("netstat: {}", e)),
            }
        }

        if let Some(pids) = platform::procfs_listeners(port) {
            return PortInspection::Listeners { pids };
        }
        failures.push("procfs: unavailable or listener owner not visible".to_string());

        let reason = failures.join("; ");
        debug!(port, %reason, "port inspection failed");
        PortInspection::Unknown { reason }
    }
}

// ---------------------------------------------------------------------------
// Output parsers
// ---------------------------------------------------------------------------

/// One PID per line (`lsof -t`).
pub fn parse_pid_lines(output: &str) -> BTreeSet<u32> {
    output
        .lines()
        .filter_map(|l| l.trim().parse::<u32>().ok())
        .filter(|pid| *pid != 0)
        .collect()
}

static SS_PID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"pid=(\d+)").unwrap());

/// `ss -ltnp` rows. A row for the port without any `pid=` means the owner is
/// hidden from us (another user's process), which is not the same as free.
pub fn parse_ss(output: &str, port: u16) -> Result<BTreeSet<u32>, String> {
    let suffix = format!(":{}", port);
    let mut pids = BTreeSet::new();
    let mut hidden_rows = 0;
    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.first() == Some(&"State") || fields.len() < 4 {
            continue;
        }
        // State Recv-Q Send-Q Local:Port Peer:Port [Process]
        if !fields[3].ends_with(&suffix) {
            continue;
        }
        let before = pids.len();
        for cap in SS_PID_RE.captures_iter(line) {
            if let Ok(pid) = cap[1].parse::<u32>() {
                pids.insert(pid);
            }
        }
        if pids.len() == before && !SS_PID_RE.is_match(line) {
            hidden_rows += 1;
        }
    }
    if pids.is_empty() && hidden_rows > 0 {
        return Err("listener present but owner not visible".to_string());
    }
    Ok(pids)
}

/// `netstat -ano` rows in state LISTENING bound to the port.
pub fn parse_netstat(output: &str, port: u16) -> BTreeSet<u32> {
    let suffix = format!(":{}", port);
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            // Proto Local Foreign State PID
            if fields.len() < 5 || !fields[0].eq_ignore_ascii_case("TCP") {
                return None;
            }
            if !fields[3].eq_ignore_ascii_case("LISTENING") || !fields[1].ends_with(&suffix) {
                return None;
            }
            fields[4].parse::<u32>().ok().filter(|pid| *pid != 0)
        })
        .collect()
}
