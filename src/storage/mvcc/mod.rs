#![forbid(unsafe_code)]
//! Multi-version concurrency control over DataManager entries.
//!
//! Every row is an [`entry`] carrying its creator (`xmin`) and deleter
//! (`xmax`). Reads never block writers; a writer that would overwrite a
//! deletion it cannot see, or race another live deleter, aborts itself with
//! [`KestrelError::ConcurrentUpdate`] instead of waiting.

pub mod entry;
mod transaction;
pub mod visibility;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

pub use entry::Entry;
pub use transaction::{IsolationLevel, Transaction};

use crate::storage::dm::DataManager;
use crate::storage::txn::TransactionStatus;
use crate::types::{KestrelError, Result, Uid, Xid};

/// Transaction front end for versioned reads and writes.
pub struct VersionManager {
    dm: Arc<DataManager>,
    status: Arc<dyn TransactionStatus>,
    active: Mutex<HashMap<Xid, Arc<Transaction>>>,
}

impl VersionManager {
    /// Creates a version manager over `dm`.
    pub fn new(dm: Arc<DataManager>, status: Arc<dyn TransactionStatus>) -> Self {
        Self {
            dm,
            status,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Starts a transaction at `level`.
    pub fn begin(&self, level: IsolationLevel) -> Result<Xid> {
        let mut active = self.active.lock();
        let xid = self.status.begin()?;
        let live = active
            .values()
            .filter(|txn| !txn.is_auto_aborted())
            .map(|txn| txn.xid);
        let txn = Arc::new(Transaction::new(xid, level, live));
        active.insert(xid, txn);
        debug!(xid = xid.0, ?level, "mvcc.begin");
        Ok(xid)
    }

    /// Commits `xid`. A transaction aborted by a conflict reports `ConcurrentUpdate` instead.
    pub fn commit(&self, xid: Xid) -> Result<()> {
        // Held until the status flips so no snapshot can miss a still-active xid.
        let mut active = self.active.lock();
        let txn = active
            .remove(&xid)
            .ok_or(KestrelError::NoSuchTransaction(xid))?;
        if txn.is_auto_aborted() {
            return Err(KestrelError::ConcurrentUpdate { xid });
        }
        self.status.commit(xid)?;
        drop(active);
        debug!(xid = xid.0, "mvcc.commit");
        Ok(())
    }

    /// Aborts `xid`. Aborting a transaction already aborted by a conflict is a no-op.
    pub fn abort(&self, xid: Xid) -> Result<()> {
        let mut active = self.active.lock();
        let txn = active
            .remove(&xid)
            .ok_or(KestrelError::NoSuchTransaction(xid))?;
        if !txn.is_auto_aborted() {
            self.status.abort(xid)?;
        }
        drop(active);
        debug!(xid = xid.0, "mvcc.abort");
        Ok(())
    }

    /// Returns the payload at `uid` if it is visible to `xid`.
    pub fn read(&self, xid: Xid, uid: Uid) -> Result<Option<Vec<u8>>> {
        let txn = self.live(xid)?;
        let Some(entry) = Entry::load(&self.dm, uid)? else {
            return Ok(None);
        };
        let (xmin, xmax) = entry.versions()?;
        if visibility::is_visible(self.status.as_ref(), &txn, xmin, xmax) {
            entry.data().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Inserts a new row created by `xid`.
    pub fn insert(&self, xid: Xid, data: &[u8]) -> Result<Uid> {
        self.live(xid)?;
        self.dm.insert(xid, &entry::wrap(xid, data))
    }

    /// Marks the row at `uid` deleted by `xid`.
    ///
    /// Returns `false` if the row is absent or not visible to `xid`.
    pub fn delete(&self, xid: Xid, uid: Uid) -> Result<bool> {
        let txn = self.live(xid)?;
        let Some(entry) = Entry::load(&self.dm, uid)? else {
            return Ok(false);
        };
        let mut guard = entry.item().before();
        let (xmin, xmax) = entry::versions(&guard.data())?;
        let status = self.status.as_ref();
        if !visibility::is_visible(status, &txn, xmin, xmax) {
            return Ok(false);
        }
        if visibility::is_version_skip(status, &txn, xmax) {
            drop(guard);
            return Err(self.auto_abort(&txn, "version_skip"));
        }
        // A live deleter owns the row, and xmax may never precede xmin.
        if (!xmax.is_super() && status.is_active(xmax)) || xmin > xid {
            drop(guard);
            return Err(self.auto_abort(&txn, "write_conflict"));
        }
        entry::set_xmax(&mut guard.data_mut(), xid);
        guard.after(xid)?;
        debug!(xid = xid.0, uid = %uid, "mvcc.delete");
        Ok(true)
    }

    /// Replaces the row at `uid` with `data` by deleting it and inserting a new version.
    ///
    /// Returns the new uid, or `None` if the old row was not visible.
    pub fn update(&self, xid: Xid, uid: Uid, data: &[u8]) -> Result<Option<Uid>> {
        if !self.delete(xid, uid)? {
            return Ok(None);
        }
        self.insert(xid, data).map(Some)
    }

    /// Number of transactions begun but not yet committed or aborted.
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Status collaborator shared with recovery.
    pub fn status(&self) -> &Arc<dyn TransactionStatus> {
        &self.status
    }

    fn live(&self, xid: Xid) -> Result<Arc<Transaction>> {
        let txn = self
            .active
            .lock()
            .get(&xid)
            .cloned()
            .ok_or(KestrelError::NoSuchTransaction(xid))?;
        if txn.is_auto_aborted() {
            return Err(KestrelError::ConcurrentUpdate { xid });
        }
        Ok(txn)
    }

    fn auto_abort(&self, txn: &Transaction, reason: &'static str) -> KestrelError {
        if txn.mark_auto_aborted() {
            if let Err(err) = self.status.abort(txn.xid) {
                return err;
            }
            debug!(xid = txn.xid.0, reason, "mvcc.auto_abort");
        }
        KestrelError::ConcurrentUpdate { xid: txn.xid }
    }
}
