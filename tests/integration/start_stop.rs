use crate::common::*;
use std::time::Duration;
use tokio::process::Command;

#[cfg(unix)]
#[tokio::test]
async fn start_stop_lifecycle() {
    let port = free_port();
    let project = TestProject::new(&format!(
        r#"
[project]
name = "test-lifecycle"
{TEST_SETTINGS}
[services.web]
command = "python3 -m http.server {port} --bind 127.0.0.1"
port = {port}
"#
    ));

    let mut child = Command::new(env!("CARGO_BIN_EXE_portrig"))
        .args(["start", "-f", project.config_arg()])
        .kill_on_drop(true)
        .spawn()
        .expect("failed to start portrig");

    assert!(
        wait_for_port(port, Duration::from_secs(10)).await,
        "Service did not become reachable on port {port}"
    );

    interrupt(&child);

    let status = tokio::time::timeout(Duration::from_secs(15), child.wait())
        .await
        .expect("portrig did not exit in time")
        .expect("failed to wait on portrig");
    assert!(status.success());

    assert!(
        wait_for_port_release(port, Duration::from_secs(5)).await,
        "Port {port} was not released after stop"
    );
}

#[cfg(unix)]
#[tokio::test]
async fn start_twice_keeps_one_listener() {
    let port = free_port();
    let project = TestProject::new(&format!(
        r#"
{TEST_SETTINGS}
[services.web]
command = "python3 -m http.server {port} --bind 127.0.0.1"
port = {port}
"#
    ));

    let mut first = Command::new(env!("CARGO_BIN_EXE_portrig"))
        .args(["start", "-f", project.config_arg()])
        .kill_on_drop(true)
        .spawn()
        .unwrap();
    assert!(wait_for_port(port, Duration::from_secs(10)).await);

    // A second portrig evicts the first one's server and takes over the port.
    let mut second = Command::new(env!("CARGO_BIN_EXE_portrig"))
        .args(["start", "-f", project.config_arg()])
        .kill_on_drop(true)
        .spawn()
        .unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(wait_for_port(port, Duration::from_secs(10)).await);

    let output = std::process::Command::new(env!("CARGO_BIN_EXE_portrig"))
        .args(["ports", &port.to_string(), "--format", "json"])
        .output()
        .unwrap();
    let reports: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    if reports[0]["listeners"]["kind"] == "listeners" {
        assert_eq!(
            reports[0]["listeners"]["pids"].as_array().unwrap().len(),
            1,
            "{}",
            reports
        );
    }

    interrupt(&second);
    interrupt(&first);
    let _ = tokio::time::timeout(Duration::from_secs(15), second.wait()).await;
    let _ = tokio::time::timeout(Duration::from_secs(15), first.wait()).await;
    assert!(wait_for_port_release(port, Duration::from_secs(5)).await);
}
