//! Transactional storage layers.
//!
//! The [`dm`] data manager places DataItems on pages and recovers them from
//! the log, [`mvcc`] layers versioned entries and isolation on top, and
//! [`btree`] keeps a disk-resident index whose nodes are DataItems.

/// Disk-resident B+ tree index.
pub mod btree;

/// Data manager: DataItems, free-space tracking and crash recovery.
pub mod dm;

/// Multi-version concurrency control.
pub mod mvcc;

mod options;
mod txn;

pub use btree::BPlusTree;
pub use dm::{DataManager, RecoveryReport};
pub use mvcc::{IsolationLevel, VersionManager};
pub use options::DbOptions;
pub use txn::{MemoryTxnStatus, TransactionStatus};
