//! CLI integration tests
//!
//! Tests the sensorctl CLI using assert_cmd.

use assert_cmd::Command;
use predicates::prelude::*;

fn sensorctl() -> Command {
    let mut cmd = Command::cargo_bin("sensorctl")
        .expect("Failed to locate sensorctl binary - ensure it's built before running tests");
    for var in [
        "EC2_SENSOR_BASE_URL",
        "EC2_SENSOR_API_KEY",
        "SSH_USERNAME",
        "SSH_PASSWORD",
        "SENSORS_FILE",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn test_cli_help() {
    sensorctl()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("sensorctl"))
        .stdout(predicate::str::contains("remote network sensors"));
}

#[test]
fn test_cli_version() {
    sensorctl()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("sensorctl"));
}

#[test]
fn test_cli_deploy_help() {
    sensorctl()
        .args(["deploy", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--branch"))
        .stdout(predicate::str::contains("--detach"));
}

#[test]
fn test_cli_upgrade_help() {
    sensorctl()
        .args(["upgrade", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--to"))
        .stdout(predicate::str::contains("--yes"));
}

#[test]
fn test_cli_traffic_start_help() {
    sensorctl()
        .args(["traffic", "some-sensor", "start", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--target"))
        .stdout(predicate::str::contains("5555"));
}

#[test]
fn test_cli_env_overrides_listed() {
    sensorctl()
        .args(["list", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("EC2_SENSOR_BASE_URL"))
        .stdout(predicate::str::contains("SENSORS_FILE"));
}

#[test]
fn test_cli_invalid_command() {
    sensorctl().arg("invalid-command").assert().failure();
}

#[test]
fn test_cli_delete_requires_sensor() {
    sensorctl().arg("delete").assert().failure();
}

#[test]
fn test_cli_config_path_honours_flag() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("custom.toml");

    sensorctl()
        .args(["--config", path.to_str().unwrap(), "config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("custom.toml"));
}

#[test]
fn test_cli_config_init_then_show() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    let path_arg = path.to_str().unwrap();

    sensorctl()
        .args(["--config", path_arg, "config", "init"])
        .assert()
        .success();
    assert!(path.exists());

    sensorctl()
        .args(["--config", path_arg, "config", "show"])
        .env("EC2_SENSOR_API_KEY", "super-secret")
        .assert()
        .success()
        .stdout(predicate::str::contains("[control_plane]"))
        .stdout(predicate::str::contains("********"))
        .stdout(predicate::str::contains("super-secret").not());
}

#[test]
fn test_cli_requires_control_plane_settings() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[inventory]\npath = \"sensors\"\n").unwrap();

    sensorctl()
        .args(["--config", path.to_str().unwrap(), "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("EC2_SENSOR_BASE_URL"));
}

#[test]
fn test_cli_fails_when_inventory_unreadable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "").unwrap();

    sensorctl()
        .args(["--config", path.to_str().unwrap(), "list"])
        .env("EC2_SENSOR_BASE_URL", "http://127.0.0.1:9")
        .env("EC2_SENSOR_API_KEY", "key")
        .env("SENSORS_FILE", dir.path())
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load sensors"));
}
