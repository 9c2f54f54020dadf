//! CLI tests for the timerstore inspection binary

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;
use timerstore::{OutboxEntry, Store};

#[test]
fn test_pending_empty_store() {
    let temp = tempdir().unwrap();
    drop(Store::open(temp.path()).unwrap());

    Command::cargo_bin("timerstore")
        .unwrap()
        .args(["--path", temp.path().to_str().unwrap(), "pending"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Outbox is empty"));
}

#[test]
fn test_pending_lists_entries_as_json() {
    let temp = tempdir().unwrap();
    {
        let mut store = Store::open(temp.path()).unwrap();
        store
            .enqueue(&OutboxEntry::new(
                "create_capture",
                "captures",
                "1254:madera",
                serde_json::json!({"folio": 1254}),
            ))
            .unwrap();
    }

    Command::cargo_bin("timerstore")
        .unwrap()
        .args(["--path", temp.path().to_str().unwrap(), "pending", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("create_capture"))
        .stdout(predicate::str::contains("1254:madera"));
}

#[test]
fn test_missing_subcommand_fails() {
    let temp = tempdir().unwrap();
    Command::cargo_bin("timerstore")
        .unwrap()
        .args(["--path", temp.path().to_str().unwrap()])
        .assert()
        .failure();
}
