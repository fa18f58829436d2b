use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::types::{KestrelError, Result, Xid};

/// Isolation level of a transaction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Sees every version committed before each read.
    #[default]
    ReadCommitted = 0,
    /// Sees only versions committed before it began.
    RepeatableRead = 1,
}

impl TryFrom<u8> for IsolationLevel {
    type Error = KestrelError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::ReadCommitted),
            1 => Ok(Self::RepeatableRead),
            _ => Err(KestrelError::InvalidOwned(format!(
                "unknown isolation level {value}"
            ))),
        }
    }
}

/// In-flight transaction state held by the version manager.
#[derive(Debug)]
pub struct Transaction {
    /// Transaction id.
    pub xid: Xid,
    /// Isolation level chosen at begin.
    pub level: IsolationLevel,
    snapshot: HashSet<Xid>,
    auto_aborted: AtomicBool,
}

impl Transaction {
    /// Creates a transaction; `active` is recorded only for repeatable read.
    pub fn new(xid: Xid, level: IsolationLevel, active: impl IntoIterator<Item = Xid>) -> Self {
        let snapshot = match level {
            IsolationLevel::RepeatableRead => active.into_iter().collect(),
            IsolationLevel::ReadCommitted => HashSet::new(),
        };
        Self {
            xid,
            level,
            snapshot,
            auto_aborted: AtomicBool::new(false),
        }
    }

    /// Returns `true` if `xid` was active when this transaction began.
    pub fn in_snapshot(&self, xid: Xid) -> bool {
        !xid.is_super() && self.snapshot.contains(&xid)
    }

    /// Returns `true` once a conflict has aborted the transaction.
    pub fn is_auto_aborted(&self) -> bool {
        self.auto_aborted.load(Ordering::Acquire)
    }

    pub(crate) fn mark_auto_aborted(&self) -> bool {
        !self.auto_aborted.swap(true, Ordering::AcqRel)
    }
}
