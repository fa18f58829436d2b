use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::frame::Page;
use crate::primitives::cache::{CachePolicy, CacheSource, Pinned, RefCache};
use crate::primitives::io::{FileIo, StdFileIo};
use crate::types::{
    page::{MIN_CACHE_PAGES, PAGE_SIZE},
    KestrelError, PageNo, Result,
};

/// Configuration options for the page cache.
#[derive(Clone, Debug)]
pub struct PagerOptions {
    /// Number of pages the cache may hold resident.
    pub cache_pages: usize,
    /// Hard cap on the data file size in pages; `None` means unbounded.
    pub max_pages: Option<u32>,
}

impl Default for PagerOptions {
    fn default() -> Self {
        Self {
            cache_pages: 8192,
            max_pages: None,
        }
    }
}

/// Snapshot of page cache counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PagerStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of page evictions from cache.
    pub evictions: u64,
    /// Number of dirty pages written back.
    pub dirty_writebacks: u64,
    /// Pages currently resident.
    pub resident: usize,
    /// Pages in the data file.
    pub page_count: u32,
}

/// Pinned reference to a cached page.
pub type PageHandle = Pinned<PageStore>;

/// File-backed source of page images.
pub struct PageStore {
    io: Arc<dyn FileIo>,
    file_lock: Mutex<()>,
    page_count: AtomicU32,
    dirty_writebacks: AtomicU64,
}

impl PageStore {
    fn write_back(&self, page: &Page) -> Result<()> {
        let buf = page.read();
        if !page.take_dirty() {
            return Ok(());
        }
        let result = {
            let _file = self.file_lock.lock();
            self.io
                .write_at(page.no().file_offset(PAGE_SIZE), &buf)
                .and_then(|()| self.io.sync_data())
        };
        match result {
            Ok(()) => {
                self.dirty_writebacks.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(err) => {
                page.restore_dirty();
                Err(err)
            }
        }
    }
}

impl CacheSource for PageStore {
    type Value = Page;

    fn load(&self, key: u64) -> Result<Page> {
        let count = self.page_count.load(Ordering::Acquire);
        let no = u32::try_from(key)
            .ok()
            .filter(|&n| n >= 1 && n <= count)
            .map(PageNo)
            .ok_or_else(|| KestrelError::InvalidOwned(format!("page {key} out of range")))?;
        let mut buf = vec![0u8; PAGE_SIZE].into_boxed_slice();
        {
            let _file = self.file_lock.lock();
            self.io.read_at(no.file_offset(PAGE_SIZE), &mut buf)?;
        }
        Ok(Page::new(no, buf))
    }

    fn evict(&self, _key: u64, page: &Page) -> Result<()> {
        self.write_back(page)
    }
}

/// Fixed-size page cache over the data file.
///
/// Pages are 1-indexed; page `n` lives at byte `(n - 1) * PAGE_SIZE`. Idle
/// pages stay resident until capacity pressure evicts them in LRU order, and
/// dirty pages are written back on eviction.
pub struct PageCache {
    cache: RefCache<PageStore>,
    max_pages: Option<u32>,
}

impl PageCache {
    /// Creates a new, empty data file at `path`.
    pub fn create(path: impl AsRef<Path>, options: PagerOptions) -> Result<Self> {
        let io = StdFileIo::create_new(path.as_ref())?;
        Self::with_io(Arc::new(io), options)
    }

    /// Opens an existing data file at `path`.
    pub fn open(path: impl AsRef<Path>, options: PagerOptions) -> Result<Self> {
        let io = StdFileIo::open_existing(path.as_ref())?;
        Self::with_io(Arc::new(io), options)
    }

    /// Builds a page cache over an already opened file.
    pub fn with_io(io: Arc<dyn FileIo>, options: PagerOptions) -> Result<Self> {
        if options.cache_pages < MIN_CACHE_PAGES {
            return Err(KestrelError::MemoryTooSmall {
                pages: options.cache_pages,
                min: MIN_CACHE_PAGES,
            });
        }
        let len = io.len()?;
        let page_count = u32::try_from(len / PAGE_SIZE as u64)
            .map_err(|_| KestrelError::Corruption("data file exceeds addressable pages"))?;
        if len % PAGE_SIZE as u64 != 0 {
            warn!(len, page_count, "pager.open.partial_tail_page");
        }
        info!(page_count, cache_pages = options.cache_pages, "pager.open");
        let store = PageStore {
            io,
            file_lock: Mutex::new(()),
            page_count: AtomicU32::new(page_count),
            dirty_writebacks: AtomicU64::new(0),
        };
        Ok(Self {
            cache: RefCache::new(store, CachePolicy::bounded(options.cache_pages)),
            max_pages: options.max_pages,
        })
    }

    /// Appends a page initialized with `init` and writes it to disk immediately.
    ///
    /// `init` shorter than a page is zero-padded.
    pub fn new_page(&self, init: &[u8]) -> Result<PageNo> {
        if init.len() > PAGE_SIZE {
            return Err(KestrelError::Invalid("page image larger than PAGE_SIZE"));
        }
        let store = self.cache.source();
        let cap = self.max_pages.unwrap_or(u32::MAX);
        let prev = store
            .page_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < cap).then_some(n + 1)
            })
            .map_err(|_| KestrelError::ResourceExhausted("data file page limit reached"))?;
        let no = PageNo(prev + 1);
        let mut buf = vec![0u8; PAGE_SIZE];
        buf[..init.len()].copy_from_slice(init);
        {
            let _file = store.file_lock.lock();
            store.io.write_at(no.file_offset(PAGE_SIZE), &buf)?;
            store.io.sync_data()?;
        }
        debug!(page = no.0, "pager.new_page");
        Ok(no)
    }

    /// Pins page `no`, reading it from disk on a miss.
    pub fn get(&self, no: PageNo) -> Result<PageHandle> {
        self.cache.get(u64::from(no.0))
    }

    /// Writes `page` to disk now if it is dirty.
    pub fn flush_page(&self, page: &Page) -> Result<()> {
        self.cache.source().write_back(page)
    }

    /// Sets the data file length to exactly `max` pages.
    ///
    /// Only valid while no page above `max` is resident; recovery calls it before
    /// touching any page.
    pub fn truncate(&self, max: PageNo) -> Result<()> {
        let store = self.cache.source();
        let _file = store.file_lock.lock();
        store.io.truncate(u64::from(max.0) * PAGE_SIZE as u64)?;
        store.io.sync_data()?;
        store.page_count.store(max.0, Ordering::Release);
        info!(pages = max.0, "pager.truncate");
        Ok(())
    }

    /// Number of pages in the data file.
    pub fn page_count(&self) -> u32 {
        self.cache.source().page_count.load(Ordering::Acquire)
    }

    /// Counters for hits, misses, evictions, and write-backs.
    pub fn stats(&self) -> PagerStats {
        let cache = self.cache.stats();
        let store = self.cache.source();
        PagerStats {
            hits: cache.hits,
            misses: cache.misses,
            evictions: cache.evictions,
            dirty_writebacks: store.dirty_writebacks.load(Ordering::Relaxed),
            resident: self.cache.resident(),
            page_count: self.page_count(),
        }
    }

    /// Writes back every dirty page and drops all resident pages.
    pub fn close(&self) -> Result<()> {
        self.cache.close()?;
        let store = self.cache.source();
        let _file = store.file_lock.lock();
        store.io.sync_data()?;
        info!(page_count = self.page_count(), "pager.close");
        Ok(())
    }
}
