#![allow(missing_docs)]

use kestrel::{
    Database, DbOptions, IsolationLevel, KestrelError, Result, TransactionStatus, Uid,
};
use tempfile::{tempdir, TempDir};

fn open() -> Result<(TempDir, Database)> {
    let dir = tempdir().expect("tmpdir");
    let db = Database::create(dir.path().join("mvcc"), &DbOptions::default())?;
    Ok((dir, db))
}

fn seed(db: &Database, data: &[u8]) -> Result<Uid> {
    let xid = db.begin(IsolationLevel::ReadCommitted)?;
    let uid = db.insert(xid, data)?;
    db.commit(xid)?;
    Ok(uid)
}

#[test]
fn read_committed_sees_each_commit_as_it_lands() -> Result<()> {
    let (_dir, db) = open()?;
    let row = seed(&db, b"v1")?;

    let reader = db.begin(IsolationLevel::ReadCommitted)?;
    let writer = db.begin(IsolationLevel::ReadCommitted)?;
    let next = db.update(writer, row, b"v2")?.expect("row visible to writer");

    assert_eq!(db.read(reader, row)?.as_deref(), Some(&b"v1"[..]));
    assert_eq!(db.read(reader, next)?, None);
    db.commit(writer)?;
    assert_eq!(db.read(reader, row)?, None);
    assert_eq!(db.read(reader, next)?.as_deref(), Some(&b"v2"[..]));
    db.commit(reader)
}

#[test]
fn repeatable_read_ignores_later_commits() -> Result<()> {
    let (_dir, db) = open()?;
    let row = seed(&db, b"v1")?;

    let reader = db.begin(IsolationLevel::RepeatableRead)?;
    let writer = db.begin(IsolationLevel::ReadCommitted)?;
    let next = db.update(writer, row, b"v2")?.expect("row visible to writer");
    db.commit(writer)?;

    assert_eq!(db.read(reader, row)?.as_deref(), Some(&b"v1"[..]));
    assert_eq!(db.read(reader, next)?, None);

    let later = db.begin(IsolationLevel::RepeatableRead)?;
    assert_eq!(db.read(later, row)?, None);
    assert_eq!(db.read(later, next)?.as_deref(), Some(&b"v2"[..]));
    db.commit(reader)?;
    db.commit(later)
}

#[test]
fn aborted_writes_never_become_visible() -> Result<()> {
    let (_dir, db) = open()?;
    let row = seed(&db, b"stable")?;

    let writer = db.begin(IsolationLevel::RepeatableRead)?;
    let fresh = db.insert(writer, b"phantom")?;
    assert!(db.delete(writer, row)?);
    db.abort(writer)?;

    let reader = db.begin(IsolationLevel::ReadCommitted)?;
    assert_eq!(db.read(reader, fresh)?, None);
    assert_eq!(db.read(reader, row)?.as_deref(), Some(&b"stable"[..]));
    db.commit(reader)
}

#[test]
fn repeatable_read_writer_aborts_on_version_skip() -> Result<()> {
    let (_dir, db) = open()?;
    let row = seed(&db, b"balance=10")?;

    let slow = db.begin(IsolationLevel::RepeatableRead)?;
    let fast = db.begin(IsolationLevel::ReadCommitted)?;
    db.update(fast, row, b"balance=20")?.expect("visible");
    db.commit(fast)?;

    match db.update(slow, row, b"balance=11") {
        Err(KestrelError::ConcurrentUpdate { xid }) => assert_eq!(xid, slow),
        other => panic!("expected ConcurrentUpdate, got {other:?}"),
    }
    assert!(db.status().is_aborted(slow));
    assert!(matches!(
        db.insert(slow, b"more"),
        Err(KestrelError::ConcurrentUpdate { .. })
    ));
    assert!(matches!(
        db.commit(slow),
        Err(KestrelError::ConcurrentUpdate { .. })
    ));
    assert_eq!(db.active_transactions(), 0);
    Ok(())
}

#[test]
fn read_committed_delete_skips_committed_deletion() -> Result<()> {
    let (_dir, db) = open()?;
    let row = seed(&db, b"row")?;

    let rc = db.begin(IsolationLevel::ReadCommitted)?;
    let other = db.begin(IsolationLevel::ReadCommitted)?;
    assert!(db.delete(other, row)?);
    db.commit(other)?;

    // The committed delete is visible to a read-committed transaction.
    assert!(!db.delete(rc, row)?);
    assert_eq!(db.read(rc, row)?, None);
    db.commit(rc)
}

#[test]
fn own_writes_are_visible_to_self_only() -> Result<()> {
    let (_dir, db) = open()?;
    let a = db.begin(IsolationLevel::RepeatableRead)?;
    let b = db.begin(IsolationLevel::RepeatableRead)?;
    let mine = db.insert(a, b"mine")?;
    assert_eq!(db.read(a, mine)?.as_deref(), Some(&b"mine"[..]));
    assert_eq!(db.read(b, mine)?, None);
    db.commit(a)?;
    // b's snapshot still contains a.
    assert_eq!(db.read(b, mine)?, None);
    db.commit(b)
}

#[test]
fn finished_transactions_are_rejected() -> Result<()> {
    let (_dir, db) = open()?;
    let xid = db.begin(IsolationLevel::ReadCommitted)?;
    db.commit(xid)?;
    assert!(matches!(
        db.insert(xid, b"late"),
        Err(KestrelError::NoSuchTransaction(_))
    ));
    assert!(matches!(
        db.abort(xid),
        Err(KestrelError::NoSuchTransaction(_))
    ));
    Ok(())
}
