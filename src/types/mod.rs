#![forbid(unsafe_code)]
//! Identifiers, error types, and on-disk constants shared by every layer.

use std::fmt;
use std::path::PathBuf;

pub mod checksum;

pub use checksum::{record_crc32, Checksum, Crc32Fast};

/// 1-indexed page number inside the data file.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PageNo(pub u32);

/// Address of a DataItem: page number in bits 32..64, in-page offset in bits 0..16.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Uid(pub u64);

/// Transaction identifier.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Xid(pub u64);

/// Reserved transaction used for structural writes (index nodes, boot items).
pub const SUPER_XID: Xid = Xid(0);

impl PageNo {
    /// Returns the raw page number.
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Byte offset of this page in the data file.
    pub fn file_offset(self, page_size: usize) -> u64 {
        u64::from(self.0.saturating_sub(1)) * page_size as u64
    }
}

impl Uid {
    /// Null uid, used as the "no sibling" marker in index nodes.
    pub const NULL: Uid = Uid(0);

    /// Packs a page number and in-page offset.
    pub const fn from_parts(page: PageNo, offset: u16) -> Self {
        Uid(((page.0 as u64) << 32) | offset as u64)
    }

    /// Page holding the item.
    pub const fn page(self) -> PageNo {
        PageNo((self.0 >> 32) as u32)
    }

    /// Offset of the item inside its page.
    pub const fn offset(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    /// Returns `true` for the null uid.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl Xid {
    /// Returns `true` for the reserved super transaction.
    pub const fn is_super(self) -> bool {
        self.0 == SUPER_XID.0
    }
}

impl fmt::Display for PageNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.page().0, self.offset())
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Uid {
    fn from(value: u64) -> Self {
        Uid(value)
    }
}

impl From<Uid> for u64 {
    fn from(value: Uid) -> Self {
        value.0
    }
}

impl From<u64> for Xid {
    fn from(value: u64) -> Self {
        Xid(value)
    }
}

/// Errors surfaced by every layer of the engine.
#[derive(thiserror::Error, Debug)]
pub enum KestrelError {
    /// Underlying file I/O failed.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// On-disk bytes do not match the expected format.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// Caller supplied an argument the engine cannot honor.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Same as [`KestrelError::Invalid`] with a formatted message.
    #[error("invalid argument: {0}")]
    InvalidOwned(String),
    /// Wrapped payload does not fit in a single page.
    #[error("record of {size} bytes exceeds page capacity of {max} bytes")]
    RecordTooLarge {
        /// Wrapped size of the rejected record.
        size: usize,
        /// Largest wrapped size a page can hold.
        max: usize,
    },
    /// No page with enough room could be found or allocated.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),
    /// Configured cache budget is below the minimum page count.
    #[error("cache budget of {pages} pages is below the minimum of {min}")]
    MemoryTooSmall {
        /// Pages the budget would allow.
        pages: usize,
        /// Minimum accepted page count.
        min: usize,
    },
    /// Every resident cache entry is referenced; nothing can be evicted.
    #[error("cache full: every resident entry is referenced")]
    CacheFull,
    /// `create` found an existing file.
    #[error("file already exists: {0}")]
    FileExists(PathBuf),
    /// `open` could not find a required file.
    #[error("file does not exist: {0}")]
    FileMissing(PathBuf),
    /// A repeatable-read transaction observed a deletion outside its snapshot and was aborted.
    #[error("transaction {xid} aborted by a concurrent update")]
    ConcurrentUpdate {
        /// The transaction that was aborted.
        xid: Xid,
    },
    /// The transaction is not active in this version manager.
    #[error("no active transaction {0}")]
    NoSuchTransaction(Xid),
    /// Lookup target does not exist.
    #[error("not found")]
    NotFound,
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, KestrelError>;

pub mod page {
    //! Fixed page geometry shared by the pager and the data layer.

    /// Size of every page in the data file.
    pub const PAGE_SIZE: usize = 8192;
    /// Fewest pages the page cache may be configured with.
    pub const MIN_CACHE_PAGES: usize = 10;
    /// Page number of the superblock.
    pub const SUPERBLOCK_PAGE: super::PageNo = super::PageNo(1);
}
