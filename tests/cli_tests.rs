mod support;

use assert_cmd::Command;
use predicates::prelude::*;

use support::config::write_temp_config;

fn lifeline() -> Command {
    Command::cargo_bin("lifeline").expect("binary built")
}

#[test]
fn check_prints_defaults_as_json() {
    let output = lifeline().arg("check").output().unwrap();
    assert!(output.status.success());

    let settings: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(settings["registry"]["max_connections"], 1000);
    assert_eq!(settings["recovery"]["max_retries"], 5);
    assert_eq!(settings["diagnostics"]["detail_level"], "standard");
}

#[test]
fn check_reports_file_overrides() {
    let file = write_temp_config("[registry]\nmax_connections = 12\n");

    lifeline()
        .args(["check", "--config"])
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"max_connections\": 12"));
}

#[test]
fn check_fails_on_invalid_config() {
    let file = write_temp_config("[registry]\nmax_connections = 0\n");

    lifeline()
        .args(["check", "--config"])
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("max_connections"));
}

#[test]
fn run_fails_fast_on_missing_config() {
    lifeline()
        .args(["run", "--config", "/nonexistent/lifeline.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read config file"));
}

#[test]
fn unknown_command_is_rejected() {
    lifeline().arg("serve").assert().failure();
}
