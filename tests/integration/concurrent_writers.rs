#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use kestrel::{Database, DbOptions, IsolationLevel, KestrelError, Result, Uid};
use tempfile::{tempdir, TempDir};

const THREADS: u64 = 8;

fn open() -> Result<(TempDir, Database)> {
    let dir = tempdir().expect("tmpdir");
    let options = DbOptions::default().with_cache_bytes(32 * 8192);
    let db = Database::create(dir.path().join("shared"), &options)?;
    Ok((dir, db))
}

#[test]
fn parallel_inserts_all_land() -> Result<()> {
    let (_dir, db) = open()?;
    let per_thread = 60u64;

    let written: Vec<Vec<(Uid, Vec<u8>)>> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let db = &db;
                s.spawn(move || -> Result<Vec<(Uid, Vec<u8>)>> {
                    let xid = db.begin(IsolationLevel::ReadCommitted)?;
                    let mut out = Vec::new();
                    for i in 0..per_thread {
                        let data = format!("t{t}-r{i}-{}", "x".repeat((i * 7 % 90) as usize));
                        out.push((db.insert(xid, data.as_bytes())?, data.into_bytes()));
                    }
                    db.commit(xid)?;
                    Ok(out)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("writer panicked"))
            .collect::<Result<Vec<_>>>()
    })?;

    let reader = db.begin(IsolationLevel::RepeatableRead)?;
    let mut seen = BTreeSet::new();
    for (uid, data) in written.iter().flatten() {
        assert!(seen.insert(*uid), "uid {uid} handed out twice");
        assert_eq!(db.read(reader, *uid)?.as_ref(), Some(data));
    }
    assert_eq!(seen.len() as u64, THREADS * per_thread);
    db.commit(reader)?;
    db.close()
}

#[test]
fn racing_deleters_leave_one_winner() -> Result<()> {
    let (_dir, db) = open()?;
    let seed = db.begin(IsolationLevel::ReadCommitted)?;
    let rows = (0..10)
        .map(|i| db.insert(seed, format!("row {i}").as_bytes()))
        .collect::<Result<Vec<_>>>()?;
    db.commit(seed)?;

    for &row in &rows {
        let winners = AtomicUsize::new(0);
        thread::scope(|s| {
            let mut handles = Vec::new();
            for t in 0..THREADS {
                let (db, winners) = (&db, &winners);
                let level = if t % 2 == 0 {
                    IsolationLevel::ReadCommitted
                } else {
                    IsolationLevel::RepeatableRead
                };
                handles.push(s.spawn(move || -> Result<()> {
                    let xid = db.begin(level)?;
                    match db.delete(xid, row) {
                        Ok(true) => {
                            winners.fetch_add(1, Ordering::SeqCst);
                            db.commit(xid)
                        }
                        Ok(false) => db.commit(xid),
                        Err(KestrelError::ConcurrentUpdate { .. }) => db.abort(xid),
                        Err(err) => Err(err),
                    }
                }));
            }
            handles
                .into_iter()
                .try_for_each(|h| h.join().expect("deleter panicked"))
        })?;
        assert_eq!(winners.load(Ordering::SeqCst), 1, "row {row}");
    }

    let reader = db.begin(IsolationLevel::ReadCommitted)?;
    for &row in &rows {
        assert_eq!(db.read(reader, row)?, None);
    }
    assert_eq!(db.active_transactions(), 1);
    db.commit(reader)?;
    db.close()
}

#[test]
fn index_accepts_concurrent_inserts() -> Result<()> {
    let (_dir, db) = open()?;
    let tree = db.open_index(db.create_index()?)?;
    let per_thread = 200u64;

    thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let tree = &tree;
                s.spawn(move || -> Result<()> {
                    for i in 0..per_thread {
                        // Interleave key ranges so threads split the same leaves.
                        let key = i * THREADS + t;
                        tree.insert(key, Uid(key + 1))?;
                    }
                    Ok(())
                })
            })
            .collect();
        handles
            .into_iter()
            .try_for_each(|h| h.join().expect("index writer panicked"))
    })?;

    let total = per_thread * THREADS;
    let all = tree.search_range(0, total)?;
    assert_eq!(all, (0..total).map(|k| Uid(k + 1)).collect::<Vec<_>>());
    for key in [0, 1, total / 3, total - 1] {
        assert_eq!(tree.search(key)?, vec![Uid(key + 1)]);
    }
    drop(tree);
    db.close()
}
