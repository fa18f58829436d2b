//! Version visibility rules.
//!
//! An entry's deleter equal to the super xid means the entry is alive.

use super::transaction::{IsolationLevel, Transaction};
use crate::storage::txn::TransactionStatus;
use crate::types::Xid;

/// Returns `true` if the version `(xmin, xmax)` is visible to `txn`.
pub fn is_visible(status: &dyn TransactionStatus, txn: &Transaction, xmin: Xid, xmax: Xid) -> bool {
    if xmin == txn.xid && xmax.is_super() {
        return true;
    }
    match txn.level {
        IsolationLevel::ReadCommitted => read_committed(status, txn, xmin, xmax),
        IsolationLevel::RepeatableRead => repeatable_read(status, txn, xmin, xmax),
    }
}

fn read_committed(status: &dyn TransactionStatus, txn: &Transaction, xmin: Xid, xmax: Xid) -> bool {
    if !status.is_committed(xmin) {
        return false;
    }
    xmax.is_super() || (xmax != txn.xid && !status.is_committed(xmax))
}

fn repeatable_read(status: &dyn TransactionStatus, txn: &Transaction, xmin: Xid, xmax: Xid) -> bool {
    if !status.is_committed(xmin) || xmin > txn.xid || txn.in_snapshot(xmin) {
        return false;
    }
    if xmax.is_super() {
        return true;
    }
    xmax != txn.xid && (!status.is_committed(xmax) || xmax > txn.xid || txn.in_snapshot(xmax))
}

/// Returns `true` when `txn` would have to skip over a committed deletion it cannot see.
///
/// Only repeatable read is affected.
pub fn is_version_skip(status: &dyn TransactionStatus, txn: &Transaction, xmax: Xid) -> bool {
    txn.level == IsolationLevel::RepeatableRead
        && !xmax.is_super()
        && status.is_committed(xmax)
        && (xmax > txn.xid || txn.in_snapshot(xmax))
}
