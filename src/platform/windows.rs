use std::collections::BTreeSet;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use windows_sys::Win32::Foundation::CloseHandle;
use windows_sys::Win32::System::Threading::{
    GetExitCodeProcess, OpenProcess, CREATE_NEW_PROCESS_GROUP, PROCESS_QUERY_LIMITED_INFORMATION,
};

use super::{SignalOutcome, StopSignal};

pub const SHELL_NAME: &str = "cmd.exe /C";

const STILL_ACTIVE: u32 = 259;

pub fn shell_name() -> String {
    SHELL_NAME.to_string()
}

pub fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd.exe");
    cmd.arg("/C").arg(command);
    cmd
}

pub fn configure_process_group(cmd: &mut Command) {
    cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
}

pub fn is_process_alive(pid: u32) -> bool {
    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
        if handle.is_null() {
            return false;
        }
        let mut exit_code: u32 = 0;
        let result = GetExitCodeProcess(handle, &mut exit_code);
        CloseHandle(handle);
        result != 0 && exit_code == STILL_ACTIVE
    }
}

/// `taskkill` always walks the tree with `/T`; `/F` forces.
async fn taskkill(pid: u32, signal: StopSignal, timeout: Duration) -> SignalOutcome {
    let mut cmd = Command::new("taskkill");
    cmd.arg("/PID").arg(pid.to_string()).arg("/T");
    if signal == StopSignal::Force {
        cmd.arg("/F");
    }
    let result = match super::run_captured(cmd, timeout).await {
        Ok(output) if output.status.success() => SignalOutcome::Sent,
        Ok(output) => {
            let text = String::from_utf8_lossy(&output.stderr).to_lowercase();
            if text.contains("not found") {
                SignalOutcome::NoSuchProcess
            } else {
                SignalOutcome::Failed(text.trim().to_string())
            }
        }
        Err(e) => SignalOutcome::Failed(e),
    };
    debug!(pid, ?signal, ?result, "taskkill");
    result
}

pub async fn send_signal(pid: u32, signal: StopSignal, timeout: Duration) -> SignalOutcome {
    taskkill(pid, signal, timeout).await
}

pub async fn signal_group(pid: u32, signal: StopSignal, timeout: Duration) -> SignalOutcome {
    taskkill(pid, signal, timeout).await
}

pub fn procfs_listeners(_port: u16) -> Option<BTreeSet<u32>> {
    None
}
