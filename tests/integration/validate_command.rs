use crate::common::TestProject;

fn check(source: &str) -> Result<(), usize> {
    let project = TestProject::new(source);
    let (config, source) = portrig::config::load_config(&project.config_path).unwrap();
    portrig::config::validate::validate(&config, &source, "portrig.toml").map_err(|errs| errs.len())
}

#[test]
fn validate_valid_config() {
    assert!(check(
        r#"
        [project]
        name = "trackload"

        [services.backend]
        path = "../backend"
        command = "node server.js"
        port = 5050
    "#,
    )
    .is_ok());
}

#[test]
fn validate_collects_every_problem() {
    let errors = check(
        r#"
        [timing]
        max_kill_attempts = 0

        [services.backend]
        command = ""
        port = 5050

        [services.frontend]
        command = "npm run preview"
        port = 5050
    "#,
    )
    .unwrap_err();
    assert_eq!(errors, 3);
}

#[test]
fn validate_rejects_empty_file() {
    assert_eq!(check("").unwrap_err(), 1);
}
