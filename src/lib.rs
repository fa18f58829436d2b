//! Kestrel: an embedded transactional storage engine.
//!
//! Records live as DataItems in 8 KiB pages behind a reference-counted page
//! cache. Every change is logged before it reaches a page, multi-version
//! entries give read-committed and repeatable-read isolation, and a B+ tree
//! indexes `u64` keys to record uids.

#![warn(missing_docs)]

pub mod db;
pub mod primitives;
pub mod storage;
pub mod types;

pub use db::Database;
pub use storage::{
    BPlusTree, DbOptions, IsolationLevel, MemoryTxnStatus, RecoveryReport, TransactionStatus,
};
pub use types::{KestrelError, PageNo, Result, Uid, Xid, SUPER_XID};
