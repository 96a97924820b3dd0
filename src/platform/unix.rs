use std::collections::BTreeSet;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;

use super::{SignalOutcome, StopSignal};

/// Return the user's default shell from `$SHELL`, falling back to `sh`.
fn user_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "sh".to_string())
}

/// Human-readable description of the shell for log messages.
pub fn shell_name() -> String {
    format!("{} -lc", user_shell())
}

pub fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new(user_shell());
    // Login shell (-l) sources the user's profile/rc files so that
    // PATH (nvm, volta, ...) is the one the operator sees.
    cmd.arg("-l").arg("-c").arg(command);
    cmd
}

pub fn configure_process_group(cmd: &mut Command) {
    cmd.process_group(0);
}

pub fn is_process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), None) {
        // EPERM: exists, owned by someone else.
        Ok(()) | Err(Errno::EPERM) => !is_zombie(pid),
        Err(_) => false,
    }
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    std::fs::read_to_string(format!("/proc/{}/stat", pid))
        .map(|stat| stat_state(&stat) == Some('Z'))
        .unwrap_or(false)
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(pid: u32) -> bool {
    use sysinfo::{Pid as SysPid, ProcessStatus, System};
    let mut system = System::new();
    system.refresh_processes();
    system
        .process(SysPid::from_u32(pid))
        .map(|p| p.status() == ProcessStatus::Zombie)
        .unwrap_or(false)
}

/// State letter from a `/proc/<pid>/stat` line. The command name may itself
/// contain spaces and parentheses, so parse after the last `)`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn stat_state(stat: &str) -> Option<char> {
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.trim_start().chars().next()
}

fn to_nix(signal: StopSignal) -> Signal {
    match signal {
        StopSignal::Graceful => Signal::SIGTERM,
        StopSignal::Force => Signal::SIGKILL,
    }
}

fn outcome(result: nix::Result<()>) -> SignalOutcome {
    match result {
        Ok(()) => SignalOutcome::Sent,
        Err(Errno::ESRCH) => SignalOutcome::NoSuchProcess,
        Err(e) => SignalOutcome::Failed(e.to_string()),
    }
}

pub async fn send_signal(pid: u32, signal: StopSignal, _timeout: Duration) -> SignalOutcome {
    let Ok(raw) = i32::try_from(pid) else {
        return SignalOutcome::Failed(format!("pid {} out of range", pid));
    };
    let result = outcome(kill(Pid::from_raw(raw), to_nix(signal)));
    debug!(pid, ?signal, ?result, "signal");
    result
}

pub async fn signal_group(pid: u32, signal: StopSignal, _timeout: Duration) -> SignalOutcome {
    let Ok(raw) = i32::try_from(pid) else {
        return SignalOutcome::Failed(format!("pid {} out of range", pid));
    };
    let result = outcome(killpg(Pid::from_raw(raw), to_nix(signal)));
    debug!(pid, ?signal, ?result, "group signal");
    result
}

#[cfg(target_os = "linux")]
pub fn procfs_listeners(port: u16) -> Option<BTreeSet<u32>> {
    let mut inodes = BTreeSet::new();
    let mut readable = false;
    for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
        if let Ok(content) = std::fs::read_to_string(table) {
            readable = true;
            inodes.extend(listen_inodes(&content, port));
        }
    }
    if !readable {
        return None;
    }
    if inodes.is_empty() {
        return Some(BTreeSet::new());
    }

    let mut pids = BTreeSet::new();
    let proc_dir = std::fs::read_dir("/proc").ok()?;
    for entry in proc_dir.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        let Ok(fds) = std::fs::read_dir(entry.path().join("fd")) else {
            continue;
        };
        for fd in fds.flatten() {
            let Ok(link) = std::fs::read_link(fd.path()) else {
                continue;
            };
            let link = link.to_string_lossy();
            let owns = link
                .strip_prefix("socket:[")
                .and_then(|s| s.strip_suffix(']'))
                .and_then(|s| s.parse::<u64>().ok())
                .is_some_and(|inode| inodes.contains(&inode));
            if owns {
                pids.insert(pid);
                break;
            }
        }
    }
    visible_owners(&inodes, pids)
}

/// A listening socket whose owner could not be found belongs to a process
/// we may not inspect, so the answer is unknown rather than free.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn visible_owners(inodes: &BTreeSet<u64>, pids: BTreeSet<u32>) -> Option<BTreeSet<u32>> {
    if !inodes.is_empty() && pids.is_empty() {
        None
    } else {
        Some(pids)
    }
}

#[cfg(not(target_os = "linux"))]
pub fn procfs_listeners(_port: u16) -> Option<BTreeSet<u32>> {
    None
}

/// Socket inodes of LISTEN rows (state `0A`) bound to `port` in a
/// `/proc/net/tcp` style table.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn listen_inodes(content: &str, port: u16) -> Vec<u64> {
    let port_hex = format!("{:04X}", port);
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 || fields[3] != "0A" {
                return None;
            }
            let local_port = fields[1].rsplit(':').next()?;
            if !local_port.eq_ignore_ascii_case(&port_hex) {
                return None;
            }
            fields[9].parse::<u64>().ok().filter(|inode| *inode != 0)
        })
        .collect()
}
