//! Integration tests for the smartbin CLI, run against the in-memory
//! store backend.

#![allow(clippy::expect_used)]

use assert_cmd::Command;
use predicates::prelude::*;

fn smartbin() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("smartbin"));
    cmd.env_remove("SMARTBIN_STORE_BACKEND")
        .env_remove("SMARTBIN_FIREBASE_URL");
    cmd
}

fn memory() -> Command {
    let mut cmd = smartbin();
    cmd.args(["--backend", "memory"]);
    cmd
}

// --- Help and version ---

#[test]
fn test_help_lists_commands() {
    smartbin()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("set-level"))
        .stdout(predicate::str::contains("open"))
        .stdout(predicate::str::contains("levels"));
}

#[test]
fn test_version_flag() {
    smartbin()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("smartbin"));
}

#[test]
fn test_unknown_subcommand_fails() {
    smartbin().arg("compact").assert().code(2);
}

// --- Store commands ---

#[test]
fn test_set_level_memory_backend() {
    memory()
        .args(["set-level", "biodegradable", "40"])
        .assert()
        .success()
        .stdout(predicate::str::contains("BiodegradableBin level set to 40"));
}

#[test]
fn test_set_level_out_of_range_is_rejected() {
    memory()
        .args(["set-level", "NonBiodegradableBin", "140"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("between 0 and 100"));
}

#[test]
fn test_set_level_unknown_compartment_is_rejected() {
    memory()
        .args(["set-level", "glass", "10"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown compartment"));
}

#[test]
fn test_open_runs_full_cycle() {
    memory()
        .args(["open", "non-biodegradable", "--dwell-secs", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("lid opened for non-biodegradable"))
        .stdout(predicate::str::contains("lid closed"));
}

#[test]
fn test_open_zero_dwell_is_rejected() {
    memory()
        .args(["open", "biodegradable", "--dwell-secs", "0"])
        .assert()
        .code(2);
}

#[test]
fn test_zero_store_timeout_is_rejected() {
    memory()
        .env("SMARTBIN_STORE_TIMEOUT_SECS", "0")
        .arg("levels")
        .assert()
        .failure()
        .stderr(predicate::str::contains("SMARTBIN_STORE_TIMEOUT_SECS"));
}

#[test]
fn test_open_no_close_leaves_lid_open() {
    memory()
        .args(["open", "biodegradable", "--no-close"])
        .assert()
        .success()
        .stdout(predicate::str::contains("lid left open"));
}

#[test]
fn test_close_memory_backend() {
    memory()
        .arg("close")
        .assert()
        .success()
        .stdout(predicate::str::contains("lid closed"));
}

#[test]
fn test_levels_on_empty_store_fails() {
    memory()
        .arg("levels")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read bin levels"));
}

#[test]
fn test_status_on_empty_store() {
    memory()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("no bin document"));
}

#[test]
fn test_firebase_backend_requires_url() {
    smartbin()
        .args(["--backend", "firebase", "levels"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("SMARTBIN_FIREBASE_URL"));
}
