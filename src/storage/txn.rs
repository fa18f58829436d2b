//! Transaction status collaborator.
//!
//! The version manager and recovery only consume this interface; how the
//! ledger itself is persisted is up to the implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::types::{KestrelError, Result, Xid, SUPER_XID};

/// Source of transaction ids and their final states.
///
/// The super transaction counts as committed and is never active or aborted.
pub trait TransactionStatus: Send + Sync {
    /// Allocates a new, active transaction id.
    fn begin(&self) -> Result<Xid>;
    /// Marks `xid` committed.
    fn commit(&self, xid: Xid) -> Result<()>;
    /// Marks `xid` aborted.
    fn abort(&self, xid: Xid) -> Result<()>;
    /// Returns `true` while `xid` has neither committed nor aborted.
    fn is_active(&self, xid: Xid) -> bool;
    /// Returns `true` once `xid` has committed.
    fn is_committed(&self, xid: Xid) -> bool;
    /// Returns `true` once `xid` has aborted.
    fn is_aborted(&self, xid: Xid) -> bool;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TxnState {
    Active,
    Committed,
    Aborted,
}

/// In-memory transaction status ledger.
#[derive(Debug)]
pub struct MemoryTxnStatus {
    next: AtomicU64,
    states: Mutex<HashMap<Xid, TxnState>>,
}

impl Default for MemoryTxnStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTxnStatus {
    /// Creates an empty ledger; the first allocated xid is 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(SUPER_XID.0 + 1),
            states: Mutex::new(HashMap::new()),
        }
    }

    fn state(&self, xid: Xid) -> Option<TxnState> {
        self.states.lock().get(&xid).copied()
    }

    fn finish(&self, xid: Xid, to: TxnState) -> Result<()> {
        if xid.is_super() {
            return Err(KestrelError::Invalid(
                "super transaction cannot commit or abort",
            ));
        }
        let mut states = self.states.lock();
        match states.get(&xid).copied() {
            Some(TxnState::Active) => {
                states.insert(xid, to);
                debug!(xid = xid.0, state = ?to, "txn.finish");
                Ok(())
            }
            Some(state) => Err(KestrelError::InvalidOwned(format!(
                "transaction {xid} already {state:?}"
            ))),
            None => Err(KestrelError::NoSuchTransaction(xid)),
        }
    }
}

impl TransactionStatus for MemoryTxnStatus {
    fn begin(&self) -> Result<Xid> {
        let xid = Xid(self.next.fetch_add(1, Ordering::AcqRel));
        self.states.lock().insert(xid, TxnState::Active);
        Ok(xid)
    }

    fn commit(&self, xid: Xid) -> Result<()> {
        self.finish(xid, TxnState::Committed)
    }

    fn abort(&self, xid: Xid) -> Result<()> {
        self.finish(xid, TxnState::Aborted)
    }

    fn is_active(&self, xid: Xid) -> bool {
        !xid.is_super() && self.state(xid) == Some(TxnState::Active)
    }

    fn is_committed(&self, xid: Xid) -> bool {
        xid.is_super() || self.state(xid) == Some(TxnState::Committed)
    }

    fn is_aborted(&self, xid: Xid) -> bool {
        !xid.is_super() && self.state(xid) == Some(TxnState::Aborted)
    }
}
