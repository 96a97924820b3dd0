use crate::common::*;
use std::time::Duration;

/// Binds the port and ignores SIGTERM, so only a forced kill frees it.
const STUBBORN: &str = r#"
import signal, socket, sys, time
signal.signal(signal.SIGTERM, lambda *_: None)
s = socket.socket()
s.setsockopt(socket.SOL_SOCKET, socket.SO_REUSEADDR, 1)
s.bind(("127.0.0.1", int(sys.argv[1])))
s.listen()
while True:
    time.sleep(0.1)
"#;

#[cfg(unix)]
#[tokio::test]
async fn stop_kills_listener_that_ignores_sigterm() {
    let port = free_port();
    let project = TestProject::new(&format!(
        r#"
{TEST_SETTINGS}
[services.backend]
command = "true"
port = {port}
"#
    ));
    let script = project.write("stubborn.py", STUBBORN);

    let mut stubborn = std::process::Command::new("python3")
        .arg(&script)
        .arg(port.to_string())
        .spawn()
        .expect("python3 must be installed");
    assert!(wait_for_port(port, Duration::from_secs(10)).await);

    let output = tokio::process::Command::new(env!("CARGO_BIN_EXE_portrig"))
        .args(["stop", "-f", project.config_arg()])
        .output()
        .await
        .unwrap();
    assert!(
        output.status.success(),
        "stop failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    assert!(wait_for_port_release(port, Duration::from_secs(5)).await);
    let status = stubborn.wait().unwrap();
    assert!(!status.success(), "stub should have been killed");
}

#[cfg(unix)]
#[tokio::test]
async fn own_service_ignoring_interrupt_is_killed_on_shutdown() {
    let port = free_port();
    let project = TestProject::new(&format!(
        r#"
{TEST_SETTINGS}
[services.backend]
command = "exec python3 stubborn.py {port}"
port = {port}
"#
    ));
    project.write("stubborn.py", STUBBORN);

    let mut child = tokio::process::Command::new(env!("CARGO_BIN_EXE_portrig"))
        .args(["start", "-f", project.config_arg()])
        .kill_on_drop(true)
        .spawn()
        .unwrap();
    assert!(wait_for_port(port, Duration::from_secs(10)).await);

    interrupt(&child);
    let status = tokio::time::timeout(Duration::from_secs(20), child.wait())
        .await
        .expect("portrig did not exit in time")
        .unwrap();
    assert!(status.success());
    assert!(wait_for_port_release(port, Duration::from_secs(5)).await);
}
