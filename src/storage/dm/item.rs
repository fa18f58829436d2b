//! DataItems: `[valid u8][size u16][payload]` records living inside data pages.
//!
//! A [`DataItem`] is a view over its page's buffer, never a copy. Readers take
//! the item's read lock and then the page's read lock; writers go through
//! [`DataItem::before`], which holds the item's write lock until
//! [`ItemWriteGuard::after`] has logged the change. Lock order is always item
//! first, page second.

use std::ops::Range;
use std::sync::Arc;

use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use tracing::warn;

use super::page;
use super::record::LogRecord;
use crate::primitives::cache::{CacheSource, Pinned};
use crate::primitives::pager::{PageCache, PageHandle};
use crate::primitives::wal::Logger;
use crate::types::{KestrelError, Result, Uid, Xid};

const VALID: usize = 0;
const SIZE: Range<usize> = 1..3;
/// Bytes of item header preceding the payload.
pub const HEADER_LEN: usize = 3;
const FLAG_INVALID: u8 = 1;

/// Wraps `data` as a valid item image.
pub fn wrap(data: &[u8]) -> Result<Vec<u8>> {
    let size = u16::try_from(data.len()).map_err(|_| KestrelError::RecordTooLarge {
        size: data.len() + HEADER_LEN,
        max: page::MAX_FREE_SPACE,
    })?;
    let mut raw = Vec::with_capacity(HEADER_LEN + data.len());
    raw.push(0);
    raw.extend_from_slice(&size.to_be_bytes());
    raw.extend_from_slice(data);
    Ok(raw)
}

/// Clears the validity flag of an item image.
pub fn set_invalid(raw: &mut [u8]) {
    raw[VALID] = FLAG_INVALID;
}

/// Pinned reference to a cached DataItem.
pub type ItemHandle = Pinned<ItemStore>;

/// Loads DataItems out of pinned pages.
pub struct ItemStore {
    pub(crate) pages: Arc<PageCache>,
    pub(crate) logger: Arc<Logger>,
}

impl CacheSource for ItemStore {
    type Value = DataItem;

    fn load(&self, key: u64) -> Result<DataItem> {
        let uid = Uid(key);
        let no = uid.page();
        if no.0 < 2 || no.0 > self.pages.page_count() {
            return Err(KestrelError::NotFound);
        }
        let handle = self.pages.get(no)?;
        let (start, end) = {
            let buf = handle.read();
            let start = usize::from(uid.offset());
            let fso = usize::from(page::fso(&buf));
            if start < 2 || start + HEADER_LEN > fso {
                return Err(KestrelError::NotFound);
            }
            let size = usize::from(u16::from_be_bytes(buf[start + 1..start + 3].try_into().unwrap()));
            let end = start + HEADER_LEN + size;
            if end > fso {
                return Err(KestrelError::NotFound);
            }
            (start, end)
        };
        Ok(DataItem {
            uid,
            page: handle,
            start,
            end,
            lock: RwLock::new(()),
            logger: Arc::clone(&self.logger),
        })
    }

    fn evict(&self, _key: u64, _item: &DataItem) -> Result<()> {
        Ok(())
    }
}

/// One record inside a data page.
pub struct DataItem {
    uid: Uid,
    page: PageHandle,
    start: usize,
    end: usize,
    lock: RwLock<()>,
    logger: Arc<Logger>,
}

impl DataItem {
    /// Address of the item.
    pub fn uid(&self) -> Uid {
        self.uid
    }

    /// Returns `true` unless the validity flag is set to deleted.
    pub fn is_valid(&self) -> bool {
        let _item = self.lock.read();
        self.page.read()[self.start + VALID] == 0
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.end - self.start - HEADER_LEN
    }

    /// Returns `true` for a zero-length payload.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shared view of the payload, valid while the returned guard lives.
    pub fn data(&self) -> ItemRef<'_> {
        let lock = self.lock.read();
        let range = self.payload();
        ItemRef {
            bytes: RwLockReadGuard::map(self.page.read(), move |buf| &buf[range]),
            _lock: lock,
        }
    }

    /// Begins an in-place mutation: takes the write lock and snapshots the item.
    pub fn before(&self) -> ItemWriteGuard<'_> {
        let lock = self.lock.write();
        let old = self.page.read()[self.start..self.end].to_vec();
        ItemWriteGuard {
            item: self,
            old,
            touched: false,
            finished: false,
            _lock: lock,
        }
    }

    fn payload(&self) -> Range<usize> {
        self.start + HEADER_LEN..self.end
    }
}

/// Payload view returned by [`DataItem::data`].
pub struct ItemRef<'a> {
    bytes: MappedRwLockReadGuard<'a, [u8]>,
    _lock: RwLockReadGuard<'a, ()>,
}

impl std::ops::Deref for ItemRef<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

/// Exclusive mutation scope over one DataItem.
///
/// Dropping the guard without calling [`ItemWriteGuard::after`] restores the
/// snapshot taken by `before`, so an unlogged change never survives.
pub struct ItemWriteGuard<'a> {
    item: &'a DataItem,
    old: Vec<u8>,
    touched: bool,
    finished: bool,
    _lock: RwLockWriteGuard<'a, ()>,
}

impl<'a> ItemWriteGuard<'a> {
    /// Current payload, including changes made through this guard.
    pub fn data(&self) -> MappedRwLockReadGuard<'_, [u8]> {
        let range = self.item.payload();
        RwLockReadGuard::map(self.item.page.read(), move |buf| &buf[range])
    }

    /// Mutable payload. The page lock is held only while the returned guard lives.
    pub fn data_mut(&mut self) -> MappedRwLockWriteGuard<'_, [u8]> {
        self.touched = true;
        let range = self.item.payload();
        RwLockWriteGuard::map(self.item.page.write(), move |buf| &mut buf[range])
    }

    /// Logs the old and new images under `xid` and releases the item.
    ///
    /// On a logging failure the snapshot is restored before the error returns.
    pub fn after(mut self, xid: Xid) -> Result<()> {
        if !self.touched {
            self.finished = true;
            return Ok(());
        }
        let new = self.item.page.read()[self.item.start..self.item.end].to_vec();
        let record = LogRecord::Update {
            xid,
            uid: self.item.uid,
            old: std::mem::take(&mut self.old),
            new,
        };
        let logged = record.encode().and_then(|bytes| self.item.logger.log(&bytes));
        if let Err(err) = logged {
            if let LogRecord::Update { old, .. } = record {
                self.old = old;
            }
            warn!(uid = %self.item.uid, error = %err, "dm.item.after.log_failed");
            return Err(err);
        }
        self.finished = true;
        Ok(())
    }

    /// Restores the snapshot and releases the item without logging.
    pub fn un_before(mut self) {
        self.restore();
        self.finished = true;
    }

    fn restore(&mut self) {
        if !self.touched {
            return;
        }
        let mut buf = self.item.page.write();
        buf[self.item.start..self.item.end].copy_from_slice(&self.old);
        self.touched = false;
    }
}

impl Drop for ItemWriteGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.restore();
        }
    }
}
