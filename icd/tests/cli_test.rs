use std::fs;
use std::path::PathBuf;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

fn memory_config(temp: &TempDir) -> PathBuf {
    let path = temp.path().join("incidentd.yml");
    fs::write(
        &path,
        "bus:\n  endpoint: memory\ncoordinator:\n  response-deadline-secs: 120\nresponders:\n  postmortem: true\n",
    )
    .unwrap();
    path
}

#[test]
fn test_cli_help() {
    let mut cmd = cargo_bin_cmd!("icd");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("broker"))
        .stdout(predicate::str::contains("submit"))
        .stdout(predicate::str::contains("lookup"));
}

#[test]
fn test_cli_config_prints_effective_yaml() {
    let temp = TempDir::new().unwrap();
    let config = memory_config(&temp);

    let mut cmd = cargo_bin_cmd!("icd");
    cmd.args(["--log-stderr", "-c"])
        .arg(&config)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("endpoint: memory"))
        .stdout(predicate::str::contains("response-deadline-secs: 120"))
        .stdout(predicate::str::contains("postmortem: true"))
        .stdout(predicate::str::contains("ttl-secs: 86400"));
}

#[test]
fn test_cli_bad_config_fails() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("broken.yml");
    fs::write(&path, "coordinator: [not, a, map]\n").unwrap();

    let mut cmd = cargo_bin_cmd!("icd");
    cmd.args(["--log-stderr", "-c"])
        .arg(&path)
        .arg("config")
        .assert()
        .failure();
}

#[test]
fn test_cli_lookup_not_found_exits_nonzero() {
    let temp = TempDir::new().unwrap();
    let config = memory_config(&temp);

    let mut cmd = cargo_bin_cmd!("icd");
    cmd.args(["--log-stderr", "-c"])
        .arg(&config)
        .args(["lookup", "A1", "--timeout-secs", "0", "--format", "json"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("not_found"));
}

#[test]
fn test_cli_submit_reads_stdin() {
    let temp = TempDir::new().unwrap();
    let config = memory_config(&temp);

    let mut cmd = cargo_bin_cmd!("icd");
    cmd.args(["--log-stderr", "-c"])
        .arg(&config)
        .args(["submit", "-"])
        .write_stdin(r#"{"alert_id": "A1", "labels": {"alertname": "HighCpu"}}"#)
        .assert()
        .success()
        .stdout(predicate::str::contains("Submitted alert A1"));
}

#[test]
fn test_cli_submit_rejects_non_object() {
    let temp = TempDir::new().unwrap();
    let config = memory_config(&temp);

    let mut cmd = cargo_bin_cmd!("icd");
    cmd.args(["--log-stderr", "-c"])
        .arg(&config)
        .arg("submit")
        .write_stdin("[1, 2, 3]")
        .assert()
        .failure();
}

#[test]
fn test_cli_broker_refuses_memory_endpoint() {
    let temp = TempDir::new().unwrap();
    let config = memory_config(&temp);

    let mut cmd = cargo_bin_cmd!("icd");
    cmd.args(["--log-stderr", "-c"])
        .arg(&config)
        .arg("broker")
        .assert()
        .failure()
        .stderr(predicate::str::contains("needs no broker"));
}
