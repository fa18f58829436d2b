//! Low-level primitives for building the storage engine.
//!
//! Includes positioned file I/O, the shared reference-counted cache,
//! the page cache, and the write-ahead log.

/// Reference-counted, capacity-bounded cache.
///
/// Shared by the page cache and the DataItem cache.
pub mod cache;

/// I/O abstractions and utilities.
///
/// Interfaces for reading/writing data and file operations.
pub mod io;

/// Paging subsystem for efficient disk I/O.
///
/// Manages page-based storage, caching, and the superblock markers.
pub mod pager;

/// Write-ahead logging (WAL) for crash recovery.
///
/// Ensures durability through sequential logging of database operations.
pub mod wal;
