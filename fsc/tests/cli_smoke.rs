//! End-to-end smoke tests for the `fsc` binary.
//!
//! Everything here must run without docker or network: only argument
//! handling, validation, and the persistence-backed subcommands.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn fsc() -> Command {
    Command::cargo_bin("fsc").unwrap()
}

#[test]
fn version_prints_name_and_number() {
    fsc()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("fsc"));
}

#[test]
fn help_lists_subcommands() {
    fsc()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("history"))
        .stdout(predicate::str::contains("stats"));
}

#[test]
fn history_on_empty_storage_is_empty() {
    let storage = TempDir::new().unwrap();
    fsc()
        .args(["history", "--storage-root"])
        .arg(storage.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("0 job(s) total"));
}

#[test]
fn stats_on_empty_storage() {
    let storage = TempDir::new().unwrap();
    fsc()
        .args(["stats", "--storage-root"])
        .arg(storage.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Jobs: 0"));
}

#[test]
fn run_with_invalid_github_url_exits_config_error() {
    let storage = TempDir::new().unwrap();
    let tasks = storage.path().join("tasks.json");
    std::fs::write(&tasks, "[]").unwrap();

    fsc()
        .args(["run", "https://gitlab.com/o/r", "--tasks"])
        .arg(&tasks)
        .args(["--storage-root"])
        .arg(storage.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("configuration error"));
}

#[test]
fn run_with_missing_local_path_exits_config_error() {
    let storage = TempDir::new().unwrap();
    let tasks = storage.path().join("tasks.json");
    std::fs::write(&tasks, "[]").unwrap();

    fsc()
        .args(["run", "/no/such/dir", "--local", "--tasks"])
        .arg(&tasks)
        .args(["--storage-root"])
        .arg(storage.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("configuration error"));
}

#[test]
fn run_rejects_malformed_overrides() {
    let storage = TempDir::new().unwrap();
    let tasks = storage.path().join("tasks.json");
    std::fs::write(&tasks, "[]").unwrap();

    fsc()
        .args(["run", "https://github.com/o/r", "--tasks"])
        .arg(&tasks)
        .args(["-o", "not-a-pair", "--storage-root"])
        .arg(storage.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("invalid override"));
}

#[test]
fn prune_on_empty_storage_removes_nothing() {
    let storage = TempDir::new().unwrap();
    fsc()
        .args(["prune", "--days", "1", "--storage-root"])
        .arg(storage.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Pruned 0 job(s)"));
}

#[test]
fn show_unknown_job_fails() {
    let storage = TempDir::new().unwrap();
    fsc()
        .args(["show", "job-nope", "--storage-root"])
        .arg(storage.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("no job with id"));
}

#[test]
fn delete_unknown_job_fails() {
    let storage = TempDir::new().unwrap();
    fsc()
        .args(["delete", "job-nope", "--storage-root"])
        .arg(storage.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("no job with id"));
}
