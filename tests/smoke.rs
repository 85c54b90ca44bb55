//! Smoke tests -- verify the binary runs and key subcommands exist.

use assert_cmd::Command;

#[test]
fn test_cli_help() {
    Command::cargo_bin("logtriage")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("anomaly triage for cloud log streams"));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("logtriage")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("logtriage"));
}

#[test]
fn test_ingest_subcommand_exists() {
    Command::cargo_bin("logtriage")
        .unwrap()
        .args(["ingest", "--help"])
        .assert()
        .success();
}

#[test]
fn test_analyze_subcommand_exists() {
    Command::cargo_bin("logtriage")
        .unwrap()
        .args(["analyze", "--help"])
        .assert()
        .success();
}

#[test]
fn test_rules_list_subcommand_exists() {
    Command::cargo_bin("logtriage")
        .unwrap()
        .args(["rules", "list", "--help"])
        .assert()
        .success();
}

#[test]
fn test_simulate_writes_ndjson() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("batch.ndjson");

    Command::cargo_bin("logtriage")
        .unwrap()
        .args(["simulate", "--baseline", "10", "--ramp", "5", "--output"])
        .arg(&out)
        .assert()
        .success();

    let body = std::fs::read_to_string(&out).unwrap();
    let lines: Vec<&str> = body.lines().collect();
    assert!(lines.len() >= 15);
    for line in lines {
        serde_json::from_str::<serde_json::Value>(line).unwrap();
    }
}
