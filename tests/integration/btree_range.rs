#![allow(missing_docs)]

use std::sync::Arc;

use kestrel::storage::btree::BALANCE;
use kestrel::{
    BPlusTree, Database, DbOptions, IsolationLevel, MemoryTxnStatus, Result, TransactionStatus,
    Uid,
};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tempfile::{tempdir, TempDir};

const KEYS: u64 = (2 * BALANCE as u64) * 8;

fn open() -> Result<(TempDir, Database)> {
    let dir = tempdir().expect("tmpdir");
    let db = Database::create(dir.path().join("index"), &DbOptions::default())?;
    Ok((dir, db))
}

fn build(db: &Database, keys: &[u64]) -> Result<BPlusTree> {
    let tree = db.open_index(db.create_index()?)?;
    for &k in keys {
        tree.insert(k, Uid(k + 1))?;
    }
    Ok(tree)
}

fn uids(keys: impl IntoIterator<Item = u64>) -> Vec<Uid> {
    keys.into_iter().map(|k| Uid(k + 1)).collect()
}

#[test]
fn insertion_order_does_not_change_results() -> Result<()> {
    let (_dir, db) = open()?;
    let ascending: Vec<u64> = (0..KEYS).collect();
    let descending: Vec<u64> = (0..KEYS).rev().collect();
    let mut shuffled = ascending.clone();
    shuffled.shuffle(&mut ChaCha8Rng::seed_from_u64(0x5eed));

    let trees = [
        build(&db, &ascending)?,
        build(&db, &descending)?,
        build(&db, &shuffled)?,
    ];
    for tree in &trees {
        assert_eq!(tree.search_range(0, KEYS)?, uids(0..KEYS));
        assert_eq!(tree.search_range(17, 300)?, uids(17..=300));
        assert_eq!(tree.search(KEYS - 1)?, uids([KEYS - 1]));
        assert!(tree.search(KEYS)?.is_empty());
    }
    db.close()
}

#[test]
fn root_splits_repeatedly_and_range_spans_leaves() -> Result<()> {
    let (_dir, db) = open()?;
    let tree = db.open_index(db.create_index()?)?;
    let mut roots = vec![tree.root()];
    for k in 0..KEYS * 6 {
        tree.insert(k * 10, Uid(k + 1))?;
        let root = tree.root();
        if roots.last() != Some(&root) {
            roots.push(root);
        }
    }
    assert!(roots.len() >= 3, "expected at least two root splits, saw {roots:?}");

    let hits = tree.search_range(995, 3005)?;
    assert_eq!(hits, uids(100..=300));
    assert!(tree.search_range(11, 19)?.is_empty());
    assert!(tree.search_range(500, 400)?.is_empty());
    db.close()
}

#[test]
fn duplicate_keys_straddling_splits_are_all_found() -> Result<()> {
    let (_dir, db) = open()?;
    let tree = db.open_index(db.create_index()?)?;
    let copies = 5 * BALANCE as u64;
    for i in 0..copies {
        tree.insert(500, Uid(10_000 + i))?;
        tree.insert(i, Uid(i + 1))?;
        tree.insert(1000 + i, Uid(20_000 + i))?;
    }
    let mut dups = tree.search(500)?;
    dups.sort_unstable();
    assert_eq!(dups, (0..copies).map(|i| Uid(10_000 + i)).collect::<Vec<_>>());
    assert_eq!(tree.search_range(499, 501)?.len(), copies as usize);
    db.close()
}

#[test]
fn index_points_at_versioned_rows() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let base = dir.path().join("rows");
    let status: Arc<dyn TransactionStatus> = Arc::new(MemoryTxnStatus::new());

    let boot = {
        let db = Database::create_with_status(&base, &DbOptions::default(), Arc::clone(&status))?;
        let boot = db.create_index()?;
        let tree = db.open_index(boot)?;
        let xid = db.begin(IsolationLevel::ReadCommitted)?;
        for id in 0..300u64 {
            let uid = db.insert(xid, format!("row {id}").as_bytes())?;
            tree.insert(id, uid)?;
        }
        db.commit(xid)?;
        db.close()?;
        boot
    };

    let db = Database::open(&base, &DbOptions::default(), status)?;
    let tree = db.open_index(boot)?;
    let xid = db.begin(IsolationLevel::ReadCommitted)?;
    let rows = tree
        .search_range(120, 124)?
        .into_iter()
        .map(|uid| db.read(xid, uid))
        .collect::<Result<Vec<_>>>()?;
    let rows: Vec<String> = rows
        .into_iter()
        .map(|row| String::from_utf8(row.expect("visible")).expect("utf8"))
        .collect();
    assert_eq!(rows, ["row 120", "row 121", "row 122", "row 123", "row 124"]);
    db.commit(xid)?;
    db.close()
}
