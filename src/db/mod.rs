#![forbid(unsafe_code)]
//! Embedding facade tying the storage layers together for one database.


use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::primitives::pager::PagerStats;
use crate::storage::{
    BPlusTree, DataManager, DbOptions, IsolationLevel, MemoryTxnStatus, RecoveryReport,
    TransactionStatus, VersionManager,
};
use crate::types::{Result, Uid, Xid};

/// An open database: `<base>.db` plus `<base>.log`.
///
/// Dropping a `Database` without calling [`Database::close`] behaves like a
/// crash: the next [`Database::open`] replays the log.
pub struct Database {
    base: PathBuf,
    dm: Arc<DataManager>,
    vm: VersionManager,
}

impl Database {
    /// Creates a fresh database with an in-memory transaction ledger.
    pub fn create(base: impl AsRef<Path>, options: &DbOptions) -> Result<Self> {
        Self::create_with_status(base, options, Arc::new(MemoryTxnStatus::new()))
    }

    /// Creates a fresh database driven by `status`.
    pub fn create_with_status(
        base: impl AsRef<Path>,
        options: &DbOptions,
        status: Arc<dyn TransactionStatus>,
    ) -> Result<Self> {
        let base = base.as_ref();
        let dm = Arc::new(DataManager::create(base, options)?);
        Ok(Self::assemble(base, dm, status))
    }

    /// Opens an existing database, recovering it first if it was not closed cleanly.
    ///
    /// `status` must be the ledger that recorded the transactions in the log.
    pub fn open(
        base: impl AsRef<Path>,
        options: &DbOptions,
        status: Arc<dyn TransactionStatus>,
    ) -> Result<Self> {
        let base = base.as_ref();
        let dm = Arc::new(DataManager::open(base, options, status.as_ref())?);
        if let Some(report) = dm.recovery_report() {
            info!(
                path = %base.display(),
                records = report.records,
                aborted = report.aborted,
                "db.open.recovered"
            );
        }
        Ok(Self::assemble(base, dm, status))
    }

    fn assemble(base: &Path, dm: Arc<DataManager>, status: Arc<dyn TransactionStatus>) -> Self {
        let vm = VersionManager::new(Arc::clone(&dm), status);
        Self {
            base: base.to_path_buf(),
            dm,
            vm,
        }
    }

    /// Base path the database files were derived from.
    pub fn path(&self) -> &Path {
        &self.base
    }

    /// Starts a transaction at `level`.
    pub fn begin(&self, level: IsolationLevel) -> Result<Xid> {
        self.vm.begin(level)
    }

    /// Commits `xid`.
    pub fn commit(&self, xid: Xid) -> Result<()> {
        self.vm.commit(xid)
    }

    /// Aborts `xid`, leaving its writes invisible.
    pub fn abort(&self, xid: Xid) -> Result<()> {
        self.vm.abort(xid)
    }

    /// Reads the row at `uid` as seen by `xid`.
    pub fn read(&self, xid: Xid, uid: Uid) -> Result<Option<Vec<u8>>> {
        self.vm.read(xid, uid)
    }

    /// Inserts a new row owned by `xid`.
    pub fn insert(&self, xid: Xid, data: &[u8]) -> Result<Uid> {
        self.vm.insert(xid, data)
    }

    /// Deletes the row at `uid`; `false` if `xid` cannot see it.
    pub fn delete(&self, xid: Xid, uid: Uid) -> Result<bool> {
        self.vm.delete(xid, uid)
    }

    /// Replaces the row at `uid`, returning the uid of the new version.
    pub fn update(&self, xid: Xid, uid: Uid, data: &[u8]) -> Result<Option<Uid>> {
        self.vm.update(xid, uid, data)
    }

    /// Creates an empty index and returns its boot uid.
    ///
    /// The boot uid is the only handle to the index; callers persist it themselves.
    pub fn create_index(&self) -> Result<Uid> {
        BPlusTree::create(&self.dm)
    }

    /// Opens the index whose boot item is `boot`.
    pub fn open_index(&self, boot: Uid) -> Result<BPlusTree> {
        BPlusTree::load(Arc::clone(&self.dm), boot)
    }

    /// Transaction ledger shared with recovery.
    pub fn status(&self) -> &Arc<dyn TransactionStatus> {
        self.vm.status()
    }

    /// Counts from the recovery pass run by `open`, if one was needed.
    pub fn recovery_report(&self) -> Option<&RecoveryReport> {
        self.dm.recovery_report()
    }

    /// Page-cache counters.
    pub fn page_stats(&self) -> PagerStats {
        self.dm.page_cache().stats()
    }

    /// Number of transactions begun but not yet finished.
    pub fn active_transactions(&self) -> usize {
        self.vm.active_count()
    }

    /// Flushes everything and marks the database closed cleanly.
    pub fn close(&self) -> Result<()> {
        self.dm.close()?;
        info!(path = %self.base.display(), "db.close");
        Ok(())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("base", &self.base)
            .field("active", &self.vm.active_count())
            .finish()
    }
}
