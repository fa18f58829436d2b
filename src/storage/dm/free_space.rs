//! In-memory index of pages by free space, grouped into coarse bands.
//!
//! A page selected for insertion is removed from the index until its inserter
//! adds it back, so at most one inserter owns a page at a time.

use parking_lot::Mutex;

use crate::types::{page::PAGE_SIZE, PageNo};

const INTERVALS: usize = 40;
const THRESHOLD: usize = PAGE_SIZE / INTERVALS;

/// A page and the free bytes it had when it was added.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageInfo {
    /// Page number.
    pub page: PageNo,
    /// Free bytes recorded for the page.
    pub free: usize,
}

/// Banded free-space index.
pub struct FreeSpaceIndex {
    bands: Mutex<Vec<Vec<PageInfo>>>,
}

impl Default for FreeSpaceIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl FreeSpaceIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self {
            bands: Mutex::new(vec![Vec::new(); INTERVALS + 1]),
        }
    }

    /// Makes `page` available with `free` bytes.
    pub fn add(&self, page: PageNo, free: usize) {
        let band = (free / THRESHOLD).min(INTERVALS);
        self.bands.lock()[band].push(PageInfo { page, free });
    }

    /// Checks out a page with at least `required` free bytes.
    ///
    /// The search starts one band above the request's own band so near-fits are
    /// left for smaller records.
    pub fn select(&self, required: usize) -> Option<PageInfo> {
        let mut band = required / THRESHOLD;
        if band < INTERVALS {
            band += 1;
        }
        let mut bands = self.bands.lock();
        for list in bands.iter_mut().skip(band) {
            if let Some(pos) = list.iter().position(|info| info.free >= required) {
                return Some(list.remove(pos));
            }
        }
        None
    }

    /// Number of pages currently available.
    pub fn len(&self) -> usize {
        self.bands.lock().iter().map(Vec::len).sum()
    }

    /// Returns `true` when no page is available.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
