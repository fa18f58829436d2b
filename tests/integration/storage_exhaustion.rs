#![allow(missing_docs)]

use kestrel::storage::dm::{data_path, DataManager};
use kestrel::types::page::{MIN_CACHE_PAGES, PAGE_SIZE};
use kestrel::{Database, DbOptions, IsolationLevel, KestrelError, Result, SUPER_XID};
use tempfile::tempdir;

const MIN_CACHE_BYTES: u64 = (PAGE_SIZE * MIN_CACHE_PAGES) as u64;

#[test]
fn cache_below_minimum_is_rejected_before_touching_disk() {
    let dir = tempdir().expect("tmpdir");
    let base = dir.path().join("tiny");
    let options = DbOptions::default().with_cache_bytes(MIN_CACHE_BYTES - 1);
    match DataManager::create(&base, &options) {
        Err(KestrelError::MemoryTooSmall { pages, min }) => {
            assert_eq!(pages, MIN_CACHE_PAGES - 1);
            assert_eq!(min, MIN_CACHE_PAGES);
        }
        Err(other) => panic!("expected MemoryTooSmall, got {other}"),
        Ok(_) => panic!("expected MemoryTooSmall"),
    }
    assert!(!data_path(&base).exists());
}

#[test]
fn minimum_cache_serves_a_file_many_times_larger() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let options = DbOptions::default().with_cache_bytes(MIN_CACHE_BYTES);
    let dm = DataManager::create(dir.path().join("small"), &options)?;
    let uids = (0..80u32)
        .map(|i| dm.insert(SUPER_XID, &vec![(i % 251) as u8; 2000]))
        .collect::<Result<Vec<_>>>()?;
    assert!(dm.page_cache().page_count() > 2 * MIN_CACHE_PAGES as u32);

    for (i, uid) in uids.iter().enumerate().rev() {
        let item = dm.read(*uid)?.expect("present");
        assert_eq!(&*item.data(), &vec![(i % 251) as u8; 2000][..]);
    }
    let stats = dm.page_cache().stats();
    assert!(stats.evictions > 0);
    assert!(stats.resident <= MIN_CACHE_PAGES);
    dm.close()
}

#[test]
fn page_cap_surfaces_as_resource_exhausted() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    // Superblock plus three data pages.
    let options = DbOptions::default()
        .with_cache_bytes(MIN_CACHE_BYTES)
        .with_max_pages(4);
    let dm = DataManager::create(dir.path().join("capped"), &options)?;

    // Three 2600-byte records fill a page to within one band of the top.
    let record = vec![0xabu8; 2600];
    let mut stored = 0;
    let err = loop {
        match dm.insert(SUPER_XID, &record) {
            Ok(_) => stored += 1,
            Err(err) => break err,
        }
        assert!(stored <= 9, "cap was not enforced");
    };
    assert!(matches!(err, KestrelError::ResourceExhausted(_)), "{err}");
    assert_eq!(stored, 9);
    assert_eq!(dm.page_cache().page_count(), 4);

    // The leftover space on each page still takes small records.
    let small = dm.insert(SUPER_XID, &[7u8; 100])?;
    assert_eq!(&*dm.read(small)?.expect("present").data(), &[7u8; 100][..]);
    dm.close()
}

#[test]
fn oversized_records_are_refused() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let dm = DataManager::create(dir.path().join("big"), &DbOptions::default())?;
    let largest = PAGE_SIZE - 2 - 3;
    let uid = dm.insert(SUPER_XID, &vec![1u8; largest])?;
    assert_eq!(dm.read(uid)?.expect("present").len(), largest);
    assert!(matches!(
        dm.insert(SUPER_XID, &vec![1u8; largest + 1]),
        Err(KestrelError::RecordTooLarge { .. })
    ));
    dm.close()
}

#[test]
fn exhaustion_leaves_the_transaction_usable() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let options = DbOptions::default()
        .with_cache_bytes(MIN_CACHE_BYTES)
        .with_max_pages(2);
    let db = Database::create(dir.path().join("full"), &options)?;
    let xid = db.begin(IsolationLevel::ReadCommitted)?;
    let first = db.insert(xid, &vec![1u8; 4000])?;
    let second = db.insert(xid, &vec![2u8; 4000])?;
    assert!(matches!(
        db.insert(xid, &vec![3u8; 4000]),
        Err(KestrelError::ResourceExhausted(_))
    ));
    assert_eq!(db.read(xid, first)?, Some(vec![1u8; 4000]));
    assert!(db.delete(xid, second)?);
    db.commit(xid)?;
    db.close()
}
