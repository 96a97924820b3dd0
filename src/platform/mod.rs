use std::path::PathBuf;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
use unix as imp;
#[cfg(windows)]
use windows as imp;

/// Create a platform-appropriate shell command.
/// Unix: `$SHELL -l -c <command>`, Windows: `cmd.exe /C <command>`
pub fn shell_command(command: &str) -> Command {
    imp::shell_command(command)
}

/// Shell name for log messages.
pub fn shell_name() -> String {
    imp::shell_name()
}

/// Configure the command to run in a new process group.
/// Unix: `process_group(0)`, Windows: `CREATE_NEW_PROCESS_GROUP`
pub fn configure_process_group(cmd: &mut Command) {
    imp::configure_process_group(cmd)
}

/// Check if a process with the given PID is still alive.
///
/// Zombies (exited but not yet reaped by their parent) count as dead.
pub fn is_process_alive(pid: u32) -> bool {
    imp::is_process_alive(pid)
}

/// Signal strength for [`send_signal`] and [`signal_group`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// SIGTERM on Unix, `taskkill /T` on Windows.
    Graceful,
    /// SIGKILL on Unix, `taskkill /T /F` on Windows.
    Force,
}

/// Result of delivering a signal. Never an error: callers record it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalOutcome {
    Sent,
    NoSuchProcess,
    Failed(String),
}

/// Deliver a stop signal to a single process.
///
/// On Windows `taskkill /T` always covers the whole tree.
pub async fn send_signal(pid: u32, signal: StopSignal, timeout: Duration) -> SignalOutcome {
    imp::send_signal(pid, signal, timeout).await
}

/// Deliver a stop signal to the process group led by `pid`.
pub async fn signal_group(pid: u32, signal: StopSignal, timeout: Duration) -> SignalOutcome {
    imp::signal_group(pid, signal, timeout).await
}

/// Run a short-lived query command, capturing its output.
///
/// The child is killed if the timeout elapses or the future is dropped.
pub async fn run_captured(mut cmd: Command, timeout: Duration) -> Result<Output, String> {
    cmd.stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);
    let child = cmd.spawn().map_err(|e| format!("spawn failed: {}", e))?;
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(format!("wait failed: {}", e)),
        Err(_) => Err(format!(
            "timed out after {}",
            humantime::format_duration(timeout)
        )),
    }
}

/// PIDs owning LISTEN sockets on `port`, read straight from `/proc`.
///
/// `None` when the platform has no procfs or it cannot be read.
pub fn procfs_listeners(port: u16) -> Option<std::collections::BTreeSet<u32>> {
    imp::procfs_listeners(port)
}

/// Get the current user's home directory.
pub fn home_dir() -> Option<PathBuf> {
    dirs::home_dir()
}

/// Expand leading `~` or `$HOME` in a path string to the actual home directory.
///
/// Returns the original string unchanged when no home directory is available
/// or the string doesn't start with `~` or `$HOME`.
pub fn expand_home(path: &str) -> String {
    if let Some(home) = home_dir() {
        let home = home.to_string_lossy();
        if path == "~" || path == "$HOME" {
            return home.to_string();
        }
        if let Some(rest) = path.strip_prefix('~').filter(|r| r.starts_with('/')) {
            return format!("{}{}", home, rest);
        }
        if let Some(rest) = path
            .strip_prefix("$HOME")
            .filter(|r| r.starts_with('/') || r.starts_with('\\'))
        {
            return format!("{}{}", home, rest);
        }
    }
    path.to_string()
}
