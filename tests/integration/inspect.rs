#![allow(missing_docs)]

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use kestrel::storage::dm::{log_path, DataManager};
use kestrel::{Database, DbOptions, IsolationLevel, MemoryTxnStatus, TransactionStatus, SUPER_XID};
use serde_json::Value;
use tempfile::TempDir;

fn inspect_json(command: &str, base: &Path) -> Value {
    let output = cargo_bin_cmd!("kestrel-inspect")
        .args(["--format", "json", command])
        .arg(base)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).expect("valid json")
}

fn seed_database(dir: &TempDir, name: &str, close: bool) -> PathBuf {
    let base = dir.path().join(name);
    let db = Database::create(&base, &DbOptions::default()).expect("create db");
    let xid = db.begin(IsolationLevel::ReadCommitted).expect("begin");
    db.insert(xid, b"row").expect("insert");
    db.commit(xid).expect("commit");
    if close {
        db.close().expect("close");
    }
    base
}

#[test]
fn info_tells_clean_from_crashed_shutdown() {
    let dir = TempDir::new().expect("tempdir");
    let clean = seed_database(&dir, "clean", true);
    let crashed = seed_database(&dir, "crashed", false);

    let json = inspect_json("info", &clean);
    assert_eq!(json["closed_cleanly"], Value::Bool(true));
    assert_eq!(json["pages"].as_u64(), Some(2));
    assert!(json["log_bytes"].as_u64().unwrap_or(0) > 4);

    let json = inspect_json("info", &crashed);
    assert_eq!(json["closed_cleanly"], Value::Bool(false));

    let output = cargo_bin_cmd!("kestrel-inspect")
        .arg("info")
        .arg(&crashed)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8");
    assert!(text.contains("unclean (recovery on next open)"), "{text}");
}

#[test]
fn log_counts_records_by_kind() {
    let dir = TempDir::new().expect("tempdir");
    let base = dir.path().join("counted");
    let status = MemoryTxnStatus::new();
    {
        let dm = DataManager::create(&base, &DbOptions::default()).expect("create dm");
        let xid = status.begin().expect("begin");
        let first = dm.insert(xid, b"one").expect("insert");
        dm.insert(xid, b"two").expect("insert");
        dm.insert(xid, b"three").expect("insert");
        dm.insert(SUPER_XID, b"structure").expect("insert");
        let item = dm.read(first).expect("read").expect("present");
        let mut guard = item.before();
        guard.data_mut().copy_from_slice(b"ONE");
        guard.after(xid).expect("after");
        dm.close().expect("close");
    }

    let json = inspect_json("log", &base);
    assert_eq!(json["records"].as_u64(), Some(5));
    assert_eq!(json["inserts"].as_u64(), Some(4));
    assert_eq!(json["updates"].as_u64(), Some(1));
    assert_eq!(json["super_records"].as_u64(), Some(1));
    assert_eq!(json["transactions"].as_u64(), Some(1));
    assert_eq!(json["highest_page"].as_u64(), Some(2));
    assert_eq!(json["file_bytes"], json["valid_bytes"]);
}

#[test]
fn torn_tail_is_reported_and_left_in_place() {
    let dir = TempDir::new().expect("tempdir");
    let base = seed_database(&dir, "torn", false);
    let log = log_path(&base);
    let valid = fs::metadata(&log).expect("log metadata").len();
    {
        let mut file = OpenOptions::new().append(true).open(&log).expect("open log");
        file.write_all(&[0, 0, 0, 64, 0xde, 0xad, 0xbe, 0xef, 1, 2, 3])
            .expect("append garbage");
    }

    let json = inspect_json("log", &base);
    assert_eq!(json["valid_bytes"].as_u64(), Some(valid));
    assert_eq!(json["file_bytes"].as_u64(), Some(valid + 11));
    assert_eq!(json["records"].as_u64(), Some(1));

    let output = cargo_bin_cmd!("kestrel-inspect")
        .arg("log")
        .arg(&base)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8");
    assert!(text.contains("torn tail bytes"), "{text}");
    assert_eq!(fs::metadata(&log).expect("log metadata").len(), valid + 11);
}

#[test]
fn missing_database_fails() {
    let dir = TempDir::new().expect("tempdir");
    cargo_bin_cmd!("kestrel-inspect")
        .arg("info")
        .arg(dir.path().join("absent"))
        .assert()
        .failure();
}
