#![forbid(unsafe_code)]
//! Data manager: owns the page cache and the logger, places new DataItems
//! on pages, and runs recovery when the previous session did not close cleanly.

mod free_space;
mod item;
pub mod page;
mod record;
mod recovery;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

pub use free_space::{FreeSpaceIndex, PageInfo};
pub use item::{wrap, DataItem, ItemHandle, ItemRef, ItemStore, ItemWriteGuard};
pub use record::LogRecord;
pub use recovery::{recover, RecoveryReport};

use crate::primitives::cache::{CachePolicy, RefCache};
use crate::primitives::pager::{self, PageCache, PageHandle};
use crate::primitives::wal::Logger;
use crate::storage::options::DbOptions;
use crate::storage::txn::TransactionStatus;
use crate::types::{
    page::{PAGE_SIZE, SUPERBLOCK_PAGE},
    KestrelError, PageNo, Result, Uid, Xid,
};

/// Path of the data file for database `base`.
pub fn data_path(base: &Path) -> PathBuf {
    append_suffix(base, ".db")
}

/// Path of the log file for database `base`.
pub fn log_path(base: &Path) -> PathBuf {
    append_suffix(base, ".log")
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Physical record store for one database.
pub struct DataManager {
    pages: Arc<PageCache>,
    logger: Arc<Logger>,
    items: RefCache<ItemStore>,
    free_space: FreeSpaceIndex,
    superblock: PageHandle,
    alloc_attempts: usize,
    recovery: Option<RecoveryReport>,
    closed: AtomicBool,
}

impl DataManager {
    /// Creates `<base>.db` and `<base>.log`; fails if either already exists.
    pub fn create(base: impl AsRef<Path>, options: &DbOptions) -> Result<Self> {
        let base = base.as_ref();
        options.validate()?;
        let (db, log) = (data_path(base), log_path(base));
        for path in [&db, &log] {
            if path.exists() {
                return Err(KestrelError::FileExists(path.clone()));
            }
        }
        let pages = Arc::new(PageCache::create(&db, options.pager_options())?);
        let logger = Arc::new(Logger::create(&log)?);

        let mut superblock = vec![0u8; PAGE_SIZE];
        pager::stamp_open(&mut superblock);
        let no = pages.new_page(&superblock)?;
        debug_assert_eq!(no, SUPERBLOCK_PAGE);
        let superblock = pages.get(SUPERBLOCK_PAGE)?;
        info!(path = %base.display(), "dm.create");
        Ok(Self::assemble(pages, logger, superblock, options, None))
    }

    /// Opens an existing database, running recovery first if it was not closed cleanly.
    pub fn open(
        base: impl AsRef<Path>,
        options: &DbOptions,
        status: &dyn TransactionStatus,
    ) -> Result<Self> {
        let base = base.as_ref();
        options.validate()?;
        let (db, log) = (data_path(base), log_path(base));
        for path in [&db, &log] {
            if !path.exists() {
                return Err(KestrelError::FileMissing(path.clone()));
            }
        }
        let pages = Arc::new(PageCache::open(&db, options.pager_options())?);
        let logger = Arc::new(Logger::open(&log)?);
        if pages.page_count() == 0 {
            return Err(KestrelError::Corruption("data file has no superblock"));
        }

        let clean = pager::closed_cleanly(&pages.get(SUPERBLOCK_PAGE)?.read());
        let recovery = if clean {
            None
        } else {
            warn!(path = %base.display(), "dm.open.unclean_shutdown");
            Some(recover(&pages, &logger, status)?)
        };

        let superblock = pages.get(SUPERBLOCK_PAGE)?;
        pager::stamp_open(&mut superblock.write());
        pages.flush_page(&superblock)?;

        let dm = Self::assemble(pages, logger, superblock, options, recovery);
        dm.rebuild_free_space()?;
        info!(
            path = %base.display(),
            pages = dm.pages.page_count(),
            recovered = !clean,
            "dm.open"
        );
        Ok(dm)
    }

    fn assemble(
        pages: Arc<PageCache>,
        logger: Arc<Logger>,
        superblock: PageHandle,
        options: &DbOptions,
        recovery: Option<RecoveryReport>,
    ) -> Self {
        let items = RefCache::new(
            ItemStore {
                pages: Arc::clone(&pages),
                logger: Arc::clone(&logger),
            },
            CachePolicy::release_on_idle(),
        );
        Self {
            pages,
            logger,
            items,
            free_space: FreeSpaceIndex::new(),
            superblock,
            alloc_attempts: options.alloc_attempts.max(1),
            recovery,
            closed: AtomicBool::new(false),
        }
    }

    fn rebuild_free_space(&self) -> Result<()> {
        for no in 2..=self.pages.page_count() {
            let page = self.pages.get(PageNo(no))?;
            let free = page::free_space(&page.read());
            self.free_space.add(PageNo(no), free);
        }
        debug!(pages = self.free_space.len(), "dm.free_space.rebuilt");
        Ok(())
    }

    /// Reads the item at `uid`; `None` if it is absent or flagged invalid.
    pub fn read(&self, uid: Uid) -> Result<Option<ItemHandle>> {
        let item = match self.items.get(uid.0) {
            Ok(item) => item,
            Err(KestrelError::NotFound) => return Ok(None),
            Err(err) => return Err(err),
        };
        Ok(item.is_valid().then_some(item))
    }

    /// Wraps `data` as a DataItem, logs the insert, and writes it to a page.
    pub fn insert(&self, xid: Xid, data: &[u8]) -> Result<Uid> {
        let raw = wrap(data)?;
        if raw.len() > page::MAX_FREE_SPACE {
            return Err(KestrelError::RecordTooLarge {
                size: raw.len(),
                max: page::MAX_FREE_SPACE,
            });
        }

        let mut picked = None;
        for _ in 0..self.alloc_attempts {
            if let Some(info) = self.free_space.select(raw.len()) {
                picked = Some(info);
                break;
            }
            match self.pages.new_page(&page::init_raw()) {
                Ok(no) => self.free_space.add(no, page::MAX_FREE_SPACE),
                Err(KestrelError::ResourceExhausted(_)) => break,
                Err(err) => return Err(err),
            }
        }
        let info = picked.ok_or(KestrelError::ResourceExhausted(
            "no page with enough free space",
        ))?;

        let placed = self.place(xid, info.page, &raw);
        let free = match &placed {
            Ok((_, free)) => *free,
            Err(_) => info.free,
        };
        self.free_space.add(info.page, free);
        let (uid, _) = placed?;
        debug!(xid = xid.0, uid = %uid, len = data.len(), "dm.insert");
        Ok(uid)
    }

    fn place(&self, xid: Xid, no: PageNo, raw: &[u8]) -> Result<(Uid, usize)> {
        let page = self.pages.get(no)?;
        let offset = page::fso(&page.read()).max(2);
        let record = LogRecord::Insert {
            xid,
            page: no,
            offset,
            raw: raw.to_vec(),
        };
        self.logger.log(&record.encode()?)?;
        let mut buf = page.write();
        let placed = page::append(&mut buf, raw);
        debug_assert_eq!(placed, offset);
        Ok((Uid::from_parts(no, offset), page::free_space(&buf)))
    }

    /// Report of the recovery pass run by `open`, if one was needed.
    pub fn recovery_report(&self) -> Option<&RecoveryReport> {
        self.recovery.as_ref()
    }

    /// Underlying page cache.
    pub fn page_cache(&self) -> &PageCache {
        &self.pages
    }

    /// Underlying logger.
    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Stamps the clean-close marker, then flushes and shuts down the logger and cache.
    ///
    /// Calling `close` twice is a no-op. Dropping without `close` leaves the
    /// database to be recovered on the next open.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.items.close()?;
        pager::stamp_close(&mut self.superblock.write());
        self.pages.flush_page(&self.superblock)?;
        self.logger.close()?;
        self.pages.close()?;
        info!("dm.close");
        Ok(())
    }
}
