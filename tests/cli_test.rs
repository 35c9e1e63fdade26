//! CLI smoke tests driven through the real binary

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn mnemo() -> Command {
    let mut cmd = Command::cargo_bin("mnemo").expect("binary builds");
    // Keep the test hermetic: no ambient API key or layout overrides
    cmd.env_remove("EMBEDDING_API_KEY")
        .env_remove("INDEX_PATH")
        .env_remove("METADATA_PATH")
        .env_remove("MNEMO_DATA_DIR")
        .env_remove("MNEMO_API_KEY")
        .env_remove("MNEMO_PORT");
    cmd
}

#[test]
fn test_help_lists_commands() {
    mnemo()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("add"))
        .stdout(predicate::str::contains("index"))
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("chat"));
}

#[test]
fn test_bare_invocation_prints_usage() {
    mnemo()
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage: mnemo"));
}

#[test]
fn test_add_creates_record_log() {
    let dir = TempDir::new().unwrap();
    let data_dir = dir.path().join(".mnemo");

    mnemo()
        .arg("--data-dir")
        .arg(&data_dir)
        .args(["add", "今天见了张三"])
        .assert()
        .success()
        .stdout(predicate::str::contains("今天见了张三"))
        .stdout(predicate::str::contains("\"source\": \"voice\""));

    let records = std::fs::read_to_string(data_dir.join("records.json")).unwrap();
    assert!(records.contains("今天见了张三"));
    // Ingest marks the index stale
    assert!(data_dir.join(".reindex-needed").exists());
}

#[test]
fn test_add_from_stdin() {
    let dir = TempDir::new().unwrap();
    let data_dir = dir.path().join(".mnemo");

    mnemo()
        .arg("--data-dir")
        .arg(&data_dir)
        .arg("add")
        .write_stdin("从标准输入来的记录\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("从标准输入来的记录"));
}

#[test]
fn test_add_rejects_empty_input() {
    let dir = TempDir::new().unwrap();
    mnemo()
        .arg("--data-dir")
        .arg(dir.path().join(".mnemo"))
        .arg("add")
        .write_stdin("   \n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("No entry text"));
}

#[test]
fn test_add_rejects_bad_date() {
    let dir = TempDir::new().unwrap();
    mnemo()
        .arg("--data-dir")
        .arg(dir.path().join(".mnemo"))
        .args(["add", "--date", "2024/01/01", "内容"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid date"));
}

#[test]
fn test_index_requires_api_key() {
    let dir = TempDir::new().unwrap();
    mnemo()
        .arg("--data-dir")
        .arg(dir.path().join(".mnemo"))
        .arg("index")
        .assert()
        .failure()
        .stderr(predicate::str::contains("EMBEDDING_API_KEY"));
}

#[test]
fn test_status_reads_idle_without_index() {
    let dir = TempDir::new().unwrap();
    mnemo()
        .arg("--data-dir")
        .arg(dir.path().join(".mnemo"))
        .args(["status", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"status\": \"idle\""));
}

#[test]
fn test_stats_on_fresh_journal() {
    let dir = TempDir::new().unwrap();
    let data_dir = dir.path().join(".mnemo");

    mnemo()
        .arg("--data-dir")
        .arg(&data_dir)
        .args(["add", "一条记录"])
        .assert()
        .success();

    mnemo()
        .arg("--data-dir")
        .arg(&data_dir)
        .args(["stats", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"records\": 1"))
        .stdout(predicate::str::contains("\"vectors\": 0"))
        .stdout(predicate::str::contains("\"dirty\": true"));
}

#[test]
fn test_serve_refuses_network_bind_without_flag() {
    let dir = TempDir::new().unwrap();
    mnemo()
        .arg("--data-dir")
        .arg(dir.path().join(".mnemo"))
        .args(["serve", "--bind", "0.0.0.0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("dangerously-allow-network-bind"));
}

#[test]
fn test_completions_generate() {
    mnemo()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("mnemo"));
}
