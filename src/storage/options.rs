use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::primitives::pager::PagerOptions;
use crate::types::{
    page::{MIN_CACHE_PAGES, PAGE_SIZE},
    KestrelError, Result,
};

/// Options supplied when creating or opening a database.
///
/// Deserializable from TOML; missing keys fall back to [`DbOptions::default`].
///
/// ```toml
/// cache_bytes = 1048576
/// max_pages = 4096
/// alloc_attempts = 5
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DbOptions {
    /// Page cache memory budget in bytes; divided by the page size to get capacity.
    pub cache_bytes: u64,
    /// Hard cap on the data file size in pages.
    pub max_pages: Option<u32>,
    /// Pages an insert may allocate before giving up with `ResourceExhausted`.
    pub alloc_attempts: usize,
}

impl Default for DbOptions {
    fn default() -> Self {
        Self {
            cache_bytes: 64 << 20,
            max_pages: None,
            alloc_attempts: 5,
        }
    }
}

impl DbOptions {
    /// Parses options from a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|err| KestrelError::InvalidOwned(format!("options: {err}")))
    }

    /// Reads and parses a TOML options file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Sets the page cache memory budget.
    pub fn with_cache_bytes(mut self, bytes: u64) -> Self {
        self.cache_bytes = bytes;
        self
    }

    /// Caps the data file at `pages` pages.
    pub fn with_max_pages(mut self, pages: u32) -> Self {
        self.max_pages = Some(pages);
        self
    }

    /// Sets the number of page allocations an insert may attempt.
    pub fn with_alloc_attempts(mut self, attempts: usize) -> Self {
        self.alloc_attempts = attempts;
        self
    }

    /// Page cache capacity implied by `cache_bytes`.
    pub fn cache_pages(&self) -> usize {
        usize::try_from(self.cache_bytes / PAGE_SIZE as u64).unwrap_or(usize::MAX)
    }

    /// Rejects settings no database can run with.
    pub fn validate(&self) -> Result<()> {
        let pages = self.cache_pages();
        if pages < MIN_CACHE_PAGES {
            return Err(KestrelError::MemoryTooSmall {
                pages,
                min: MIN_CACHE_PAGES,
            });
        }
        if self.max_pages == Some(0) {
            return Err(KestrelError::Invalid("max_pages must leave room for the superblock"));
        }
        Ok(())
    }

    pub(crate) fn pager_options(&self) -> PagerOptions {
        PagerOptions {
            cache_pages: self.cache_pages(),
            max_pages: self.max_pages,
        }
    }
}
