use crate::common::*;
use std::time::Duration;
use tokio::process::Command;

#[cfg(unix)]
#[tokio::test]
async fn foreign_listener_is_evicted_on_start() {
    let port = free_port();
    let mut stray = spawn_http_server(port);
    assert!(wait_for_port(port, Duration::from_secs(10)).await);

    let project = TestProject::new(&format!(
        r#"
{TEST_SETTINGS}
[services.backend]
command = "python3 -m http.server {port} --bind 127.0.0.1"
port = {port}
"#
    ));

    let mut child = Command::new(env!("CARGO_BIN_EXE_portrig"))
        .args(["start", "-f", project.config_arg()])
        .kill_on_drop(true)
        .spawn()
        .expect("failed to start portrig");

    // The stray server must be gone and ours listening in its place.
    let start = std::time::Instant::now();
    let mut evicted = false;
    while start.elapsed() < Duration::from_secs(10) {
        if stray.try_wait().unwrap().is_some() {
            evicted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(evicted, "stray listener on {port} survived");
    assert!(wait_for_port(port, Duration::from_secs(10)).await);

    interrupt(&child);
    let _ = tokio::time::timeout(Duration::from_secs(15), child.wait()).await;
    assert!(wait_for_port_release(port, Duration::from_secs(5)).await);
}

#[cfg(unix)]
#[test]
fn stop_command_frees_port_held_by_stranger() {
    let port = free_port();
    let mut stray = spawn_http_server(port);
    let rt = tokio::runtime::Runtime::new().unwrap();
    assert!(rt.block_on(wait_for_port(port, Duration::from_secs(10))));

    let project = TestProject::new(&format!(
        r#"
{TEST_SETTINGS}
[services.backend]
command = "true"
port = {port}
"#
    ));

    assert_cmd::Command::cargo_bin("portrig")
        .unwrap()
        .args(["stop", "-f", project.config_arg()])
        .assert()
        .success();

    assert!(!stray.wait().unwrap().success());
    assert!(rt.block_on(wait_for_port_release(port, Duration::from_secs(5))));
}
