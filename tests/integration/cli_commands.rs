use crate::common::*;
use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn validate_reports_valid_config() {
    let project = TestProject::new(
        r#"
[services.backend]
command = "node server.js"
port = 5050

[services.frontend]
command = "npm run preview"
port = 5173

[services.frontend.build]
command = "npm run build"
"#,
    );

    Command::cargo_bin("portrig")
        .unwrap()
        .args(["validate", "-f", project.config_arg()])
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid (2 services, 1 with a build step)"));
}

#[test]
fn validate_rejects_duplicate_ports() {
    let project = TestProject::new(
        r#"
[services.backend]
command = "node server.js"
port = 5050

[services.frontend]
command = "npm run preview"
port = 5050
"#,
    );

    Command::cargo_bin("portrig")
        .unwrap()
        .args(["validate", "-f", project.config_arg()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("5050"))
        .stderr(predicate::str::contains("configuration error"));
}

#[test]
fn missing_config_is_an_error() {
    let dir = tempfile::TempDir::new().unwrap();
    Command::cargo_bin("portrig")
        .unwrap()
        .args(["status", "-f"])
        .arg(dir.path().join("nope.toml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Config file not found"));
}

#[test]
fn status_json_lists_services() {
    let ports = free_ports(2);
    let (backend, frontend) = (ports[0], ports[1]);
    let project = TestProject::new(&format!(
        r#"
{TEST_SETTINGS}
[services.backend]
command = "true"
port = {backend}

[services.frontend]
command = "true"
port = {frontend}
"#
    ));

    let output = Command::cargo_bin("portrig")
        .unwrap()
        .args(["status", "--format", "json", "-f", project.config_arg()])
        .output()
        .unwrap();
    assert!(output.status.success());
    let snapshot: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let services = snapshot["services"].as_array().unwrap();
    assert_eq!(services.len(), 2);
    assert_eq!(services[0]["name"], "backend");
    assert_eq!(services[0]["port"], backend);
    assert_eq!(services[1]["name"], "frontend");
    assert_ne!(services[0]["state"], "running");
    assert!(snapshot["memory"]["total_bytes"].as_u64().unwrap() > 0);
}

#[test]
fn ports_shows_our_own_listener() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let output = Command::cargo_bin("portrig")
        .unwrap()
        .args(["ports", &port.to_string(), "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let reports: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(reports[0]["port"], port);
    if reports[0]["listeners"]["kind"] == "listeners" {
        let pids: Vec<u64> = reports[0]["listeners"]["pids"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|p| p.as_u64())
            .collect();
        assert!(pids.contains(&(std::process::id() as u64)), "{}", reports);
    }
}

#[test]
fn init_writes_a_valid_config() {
    let dir = tempfile::TempDir::new().unwrap();
    Command::cargo_bin("portrig")
        .unwrap()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created portrig.toml"));

    Command::cargo_bin("portrig")
        .unwrap()
        .current_dir(dir.path())
        .arg("validate")
        .assert()
        .success();

    Command::cargo_bin("portrig")
        .unwrap()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}
