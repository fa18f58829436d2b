//! Versioned entries: `[xmin u64][xmax u64][payload]` stored as a DataItem.

use std::ops::Range;

use crate::storage::dm::{DataItem, DataManager, ItemHandle};
use crate::types::{KestrelError, Result, Uid, Xid, SUPER_XID};

const XMIN: Range<usize> = 0..8;
const XMAX: Range<usize> = 8..16;
const DATA: usize = 16;

/// Builds the stored image of a new entry created by `xid`.
pub fn wrap(xid: Xid, data: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(DATA + data.len());
    raw.extend_from_slice(&xid.0.to_be_bytes());
    raw.extend_from_slice(&SUPER_XID.0.to_be_bytes());
    raw.extend_from_slice(data);
    raw
}

/// Creator and deleter of an entry image. A deleter equal to the super xid means alive.
pub fn versions(raw: &[u8]) -> Result<(Xid, Xid)> {
    if raw.len() < DATA {
        return Err(KestrelError::Corruption("entry shorter than its header"));
    }
    let xmin = Xid(u64::from_be_bytes(raw[XMIN].try_into().unwrap()));
    let xmax = Xid(u64::from_be_bytes(raw[XMAX].try_into().unwrap()));
    Ok((xmin, xmax))
}

/// Stamps the deleter into an entry image.
pub fn set_xmax(raw: &mut [u8], xid: Xid) {
    raw[XMAX].copy_from_slice(&xid.0.to_be_bytes());
}

/// A pinned entry.
pub struct Entry {
    item: ItemHandle,
}

impl Entry {
    /// Loads the entry at `uid`, or `None` if no valid DataItem lives there.
    pub fn load(dm: &DataManager, uid: Uid) -> Result<Option<Self>> {
        Ok(dm.read(uid)?.map(|item| Self { item }))
    }

    /// Underlying DataItem.
    pub fn item(&self) -> &DataItem {
        &self.item
    }

    /// Current creator and deleter.
    pub fn versions(&self) -> Result<(Xid, Xid)> {
        versions(&self.item.data())
    }

    /// Copy of the payload.
    pub fn data(&self) -> Result<Vec<u8>> {
        let raw = self.item.data();
        if raw.len() < DATA {
            return Err(KestrelError::Corruption("entry shorter than its header"));
        }
        Ok(raw[DATA..].to_vec())
    }
}
