//! Integration tests for the Loopguard CLI

use assert_cmd::cargo;
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a Command for the loopguard binary
fn loopguard() -> Command {
    Command::new(cargo::cargo_bin!("loopguard"))
}

#[test]
fn test_help() {
    loopguard()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Supervise an autonomous coding agent loop",
        ));
}

#[test]
fn test_version() {
    loopguard()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.1.0"));
}

#[test]
fn test_missing_project_dir() {
    loopguard()
        .arg("--project")
        .arg("/definitely/not/a/real/path")
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_status_on_fresh_project() {
    let temp = TempDir::new().unwrap();

    loopguard()
        .arg("--project")
        .arg(temp.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("No circuit breaker state"));
}

#[test]
fn test_status_json_on_fresh_project() {
    let temp = TempDir::new().unwrap();

    let output = loopguard()
        .arg("--project")
        .arg(temp.path())
        .arg("status")
        .arg("--json")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let parsed: serde_json::Value = serde_json::from_slice(&output).expect("valid JSON");
    assert!(parsed["circuit_breaker"].is_null());
    assert!(parsed["exit_signals"].is_null());
}

#[test]
fn test_reset_writes_state() {
    let temp = TempDir::new().unwrap();

    loopguard()
        .arg("--project")
        .arg(temp.path())
        .arg("reset")
        .arg("--reason")
        .arg("test reset")
        .assert()
        .success()
        .stdout(predicate::str::contains("CLOSED"));

    assert!(temp.path().join(".loopguard/circuit_breaker.json").exists());

    // Status now reports the persisted record
    loopguard()
        .arg("--project")
        .arg(temp.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("CLOSED"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("loopguard.toml"), "max_iterations = 0\n").unwrap();

    // Reset loads and validates the config, so it must fail
    loopguard()
        .arg("--project")
        .arg(temp.path())
        .arg("reset")
        .assert()
        .failure()
        .stderr(predicate::str::contains("max_iterations"));
}

#[test]
fn test_run_requires_agent_binary() {
    let temp = TempDir::new().unwrap();

    loopguard()
        .arg("--project")
        .arg(temp.path())
        .arg("run")
        .arg("--agent")
        .arg("definitely-not-a-real-agent")
        .assert()
        .failure()
        .stderr(predicate::str::contains("definitely-not-a-real-agent"));
}

#[test]
fn test_run_supervises_scripted_agent() {
    let temp = TempDir::new().unwrap();

    // Real git repo so progress measurement works
    let git = |args: &[&str]| {
        let status = std::process::Command::new("git")
            .args(args)
            .current_dir(temp.path())
            .status()
            .expect("git");
        assert!(status.success(), "git {:?}", args);
    };
    git(&["init", "--quiet"]);
    git(&["config", "user.email", "test@example.com"]);
    git(&["config", "user.name", "Test"]);

    // An agent that never changes anything: the breaker must halt the
    // run as stagnated after three idle iterations.
    loopguard()
        .arg("--project")
        .arg(temp.path())
        .arg("run")
        .arg("--agent")
        .arg("cat")
        .arg("--max-iterations")
        .arg("10")
        .arg("thinking about the problem")
        .assert()
        .failure()
        .code(3)
        .stdout(predicate::str::contains("STAGNATED"));
}
