#![allow(missing_docs)]

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::{Arc, Once};

use kestrel::storage::dm::{data_path, log_path, DataManager};
use kestrel::types::page::PAGE_SIZE;
use kestrel::{
    Database, DbOptions, IsolationLevel, MemoryTxnStatus, Result, TransactionStatus, SUPER_XID,
};
use tempfile::tempdir;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn options() -> DbOptions {
    DbOptions::default().with_cache_bytes((PAGE_SIZE * 32) as u64)
}

fn payload(dm: &DataManager, uid: kestrel::Uid) -> Result<Option<Vec<u8>>> {
    Ok(dm.read(uid)?.map(|item| item.data().to_vec()))
}

#[test]
fn committed_updates_redo_and_uncommitted_updates_undo() -> Result<()> {
    init_tracing();
    let dir = tempdir().expect("tmpdir");
    let base = dir.path().join("accounts");
    let status = MemoryTxnStatus::new();

    let (a, b) = {
        let dm = DataManager::create(&base, &options())?;
        let setup = status.begin()?;
        let a = dm.insert(setup, b"alice=100")?;
        let b = dm.insert(setup, b"bobby=200")?;
        status.commit(setup)?;

        let committed = status.begin()?;
        let item = dm.read(a)?.expect("a present");
        let mut guard = item.before();
        guard.data_mut().copy_from_slice(b"alice=050");
        guard.after(committed)?;
        status.commit(committed)?;

        let pending = status.begin()?;
        let item = dm.read(b)?.expect("b present");
        let mut guard = item.before();
        guard.data_mut().copy_from_slice(b"bobby=999");
        guard.after(pending)?;
        assert_eq!(payload(&dm, b)?.as_deref(), Some(&b"bobby=999"[..]));
        (a, b)
        // dropped without close: crash
    };

    let dm = DataManager::open(&base, &options(), &status)?;
    let report = dm.recovery_report().cloned().expect("recovery ran");
    assert_eq!(report.redone_inserts, 2);
    assert_eq!(report.redone_updates, 1);
    assert_eq!(report.undone_updates, 1);
    assert_eq!(report.aborted, 1);
    assert_eq!(payload(&dm, a)?.as_deref(), Some(&b"alice=050"[..]));
    assert_eq!(payload(&dm, b)?.as_deref(), Some(&b"bobby=200"[..]));
    dm.close()
}

#[test]
fn lost_page_writes_are_rebuilt_from_the_log() -> Result<()> {
    init_tracing();
    let dir = tempdir().expect("tmpdir");
    let base = dir.path().join("lost");
    let status = MemoryTxnStatus::new();

    let uids = {
        let dm = DataManager::create(&base, &options())?;
        let xid = status.begin()?;
        let uids = (0..50u32)
            .map(|i| dm.insert(xid, &vec![i as u8; 300]))
            .collect::<Result<Vec<_>>>()?;
        status.commit(xid)?;
        uids
    };

    // Keep only the superblock; every data page must come back from the log.
    let file = OpenOptions::new().write(true).open(data_path(&base))?;
    file.set_len(PAGE_SIZE as u64)?;
    drop(file);

    let dm = DataManager::open(&base, &options(), &status)?;
    let report = dm.recovery_report().cloned().expect("recovery ran");
    assert_eq!(report.redone_inserts, 50);
    assert!(dm.page_cache().page_count() >= 3);
    for (i, uid) in uids.iter().enumerate() {
        assert_eq!(payload(&dm, *uid)?, Some(vec![i as u8; 300]));
    }
    dm.close()
}

#[test]
fn torn_log_tail_is_discarded() -> Result<()> {
    init_tracing();
    let dir = tempdir().expect("tmpdir");
    let base = dir.path().join("torn");
    let status = MemoryTxnStatus::new();

    let uid = {
        let dm = DataManager::create(&base, &options())?;
        let xid = status.begin()?;
        let uid = dm.insert(xid, b"durable")?;
        status.commit(xid)?;
        uid
    };
    let valid_len = std::fs::metadata(log_path(&base))?.len();
    {
        let mut log = OpenOptions::new().append(true).open(log_path(&base))?;
        // A frame header promising more bytes than were written.
        log.write_all(&[0, 0, 0, 64, 0xde, 0xad, 0xbe, 0xef, 1, 2, 3])?;
    }

    let dm = DataManager::open(&base, &options(), &status)?;
    assert_eq!(dm.logger().len(), valid_len);
    assert_eq!(std::fs::metadata(log_path(&base))?.len(), valid_len);
    assert_eq!(payload(&dm, uid)?.as_deref(), Some(&b"durable"[..]));
    dm.close()
}

#[test]
fn recovery_is_idempotent_across_repeated_crashes() -> Result<()> {
    init_tracing();
    let dir = tempdir().expect("tmpdir");
    let base = dir.path().join("twice");
    let status: Arc<dyn TransactionStatus> = Arc::new(MemoryTxnStatus::new());

    let (kept, rolled_back) = {
        let db = Database::create_with_status(&base, &options(), Arc::clone(&status))?;
        let t1 = db.begin(IsolationLevel::ReadCommitted)?;
        let kept = db.insert(t1, b"kept")?;
        db.commit(t1)?;
        let t2 = db.begin(IsolationLevel::ReadCommitted)?;
        let rolled_back = db.insert(t2, b"rolled back")?;
        assert!(db.delete(t2, kept)?);
        (kept, rolled_back)
    };

    for _ in 0..2 {
        let db = Database::open(&base, &options(), Arc::clone(&status))?;
        assert!(db.recovery_report().is_some());
        let reader = db.begin(IsolationLevel::RepeatableRead)?;
        assert_eq!(db.read(reader, kept)?.as_deref(), Some(&b"kept"[..]));
        assert_eq!(db.read(reader, rolled_back)?, None);
        db.commit(reader)?;
        // dropped without close again
    }

    let db = Database::open(&base, &options(), Arc::clone(&status))?;
    db.close()?;
    drop(db);
    let db = Database::open(&base, &options(), status)?;
    assert!(db.recovery_report().is_none());
    db.close()
}

#[test]
fn structural_writes_survive_without_a_commit() -> Result<()> {
    init_tracing();
    let dir = tempdir().expect("tmpdir");
    let base = dir.path().join("super");
    let status = MemoryTxnStatus::new();

    let uid = {
        let dm = DataManager::create(&base, &options())?;
        let uid = dm.insert(SUPER_XID, b"root pointer")?;
        let item = dm.read(uid)?.expect("present");
        let mut guard = item.before();
        guard.data_mut()[..4].copy_from_slice(b"ROOT");
        guard.after(SUPER_XID)?;
        uid
    };

    let dm = DataManager::open(&base, &options(), &status)?;
    let report = dm.recovery_report().cloned().expect("recovery ran");
    assert_eq!(report.undone_inserts + report.undone_updates, 0);
    assert_eq!(report.aborted, 0);
    assert_eq!(payload(&dm, uid)?.as_deref(), Some(&b"ROOT pointer"[..]));
    dm.close()
}

#[test]
fn aborted_delete_does_not_undo_a_later_committed_delete() -> Result<()> {
    init_tracing();
    let dir = tempdir().expect("tmpdir");
    let base = dir.path().join("redelete");
    let status: Arc<dyn TransactionStatus> = Arc::new(MemoryTxnStatus::new());

    let (row, survivor) = {
        let db = Database::create_with_status(&base, &options(), Arc::clone(&status))?;
        let t0 = db.begin(IsolationLevel::ReadCommitted)?;
        let row = db.insert(t0, b"row")?;
        let survivor = db.insert(t0, b"survivor")?;
        db.commit(t0)?;

        let t1 = db.begin(IsolationLevel::ReadCommitted)?;
        assert!(db.delete(t1, row)?);
        db.abort(t1)?;

        let t2 = db.begin(IsolationLevel::ReadCommitted)?;
        assert!(db.delete(t2, row)?);
        db.commit(t2)?;
        (row, survivor)
        // dropped without close
    };

    let db = Database::open(&base, &options(), Arc::clone(&status))?;
    let report = db.recovery_report().cloned().expect("recovery ran");
    assert_eq!(report.redone_updates, 1);
    assert_eq!(report.superseded_updates, 1);
    assert_eq!(report.undone_updates, 0);

    let reader = db.begin(IsolationLevel::ReadCommitted)?;
    assert_eq!(db.read(reader, row)?, None);
    assert_eq!(db.read(reader, survivor)?.as_deref(), Some(&b"survivor"[..]));
    db.commit(reader)?;
    db.close()
}
