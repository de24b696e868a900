//! Smoke tests for the `lattice` binary.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_help_lists_run() {
    Command::cargo_bin("lattice")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"));
}

#[test]
fn test_version() {
    Command::cargo_bin("lattice")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_connect_rejects_bad_address() {
    Command::cargo_bin("lattice")
        .unwrap()
        .args(["run", "echo", "hello", "--connect", "no-port-here"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("host:port"));
}
