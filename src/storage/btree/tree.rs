use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info};

use super::node::{self, ChildSlot, Route, Scan, Slot};
use crate::storage::dm::{DataManager, ItemHandle, ItemWriteGuard};
use crate::types::{KestrelError, Result, Uid, SUPER_XID};

/// Pending split to be recorded one level up.
#[derive(Clone, Copy, Debug)]
struct Split {
    left: Uid,
    sep: u64,
    right: Uid,
}

/// Disk-resident B+ tree mapping `u64` keys (duplicates allowed) to uids.
///
/// Nodes are DataItems written under the super transaction. A boot item holds
/// the root's uid so a root split can swap roots atomically. Searches and
/// non-splitting inserts take no tree-wide lock: anything that runs off the
/// end of a node's keys follows its right sibling. Split propagation is
/// serialized by `split_lock`, so parents always learn of splits in the order
/// they happened.
pub struct BPlusTree {
    dm: Arc<DataManager>,
    boot_uid: Uid,
    boot: ItemHandle,
    boot_lock: Mutex<()>,
    split_lock: Mutex<()>,
}

/// Held from a node's split until its separator has reached a parent.
type SplitGuard<'a> = Option<MutexGuard<'a, ()>>;

impl BPlusTree {
    /// Creates an empty tree and returns the uid of its boot item.
    pub fn create(dm: &DataManager) -> Result<Uid> {
        let root = dm.insert(SUPER_XID, &node::empty_root())?;
        let boot = dm.insert(SUPER_XID, &root.0.to_be_bytes())?;
        info!(boot = %boot, root = %root, "btree.create");
        Ok(boot)
    }

    /// Opens the tree whose boot item lives at `boot_uid`.
    pub fn load(dm: Arc<DataManager>, boot_uid: Uid) -> Result<Self> {
        let boot = dm.read(boot_uid)?.ok_or(KestrelError::NotFound)?;
        if boot.len() != 8 {
            return Err(KestrelError::Corruption("btree boot item has wrong size"));
        }
        Ok(Self {
            dm,
            boot_uid,
            boot,
            boot_lock: Mutex::new(()),
            split_lock: Mutex::new(()),
        })
    }

    /// Uid of the boot item.
    pub fn boot_uid(&self) -> Uid {
        self.boot_uid
    }

    /// Uid of the current root node.
    pub fn root(&self) -> Uid {
        let _boot = self.boot_lock.lock();
        self.root_locked()
    }

    fn root_locked(&self) -> Uid {
        Uid(u64::from_be_bytes(self.boot.data()[..8].try_into().unwrap()))
    }

    /// Uids indexed under exactly `key`.
    pub fn search(&self, key: u64) -> Result<Vec<Uid>> {
        self.search_range(key, key)
    }

    /// Uids whose keys fall in `lo..=hi`, in ascending key order.
    pub fn search_range(&self, lo: u64, hi: u64) -> Result<Vec<Uid>> {
        let mut out = Vec::new();
        if lo > hi {
            return Ok(out);
        }
        let mut current = self.find_leaf(lo, &mut Vec::new())?;
        loop {
            let item = self.node(current)?;
            let raw = item.data();
            match node::collect_range(&raw, lo, hi, &mut out) {
                Scan::Done => return Ok(out),
                Scan::Continue(next) => current = next,
            }
        }
    }

    /// Indexes `uid` under `key`.
    pub fn insert(&self, key: u64, uid: Uid) -> Result<()> {
        let mut path = Vec::new();
        let leaf = self.find_leaf(key, &mut path)?;
        let mut held = None;
        let mut pending = self.insert_into_leaf(leaf, key, uid, &mut held)?;
        while let Some(split) = pending {
            pending = match path.pop() {
                Some(parent) => self.insert_into_parent(parent, split, &mut held)?,
                None => self.split_root(split, &mut held)?,
            };
        }
        Ok(())
    }

    fn node(&self, uid: Uid) -> Result<ItemHandle> {
        self.dm
            .read(uid)?
            .ok_or(KestrelError::Corruption("btree node missing"))
    }

    /// Descends to the leaf that should hold `key`, recording internal nodes in `path`.
    fn find_leaf(&self, key: u64, path: &mut Vec<Uid>) -> Result<Uid> {
        let mut current = self.root();
        loop {
            let item = self.node(current)?;
            let raw = item.data();
            if node::is_leaf(&raw) {
                return Ok(current);
            }
            match node::route(&raw, key)? {
                Route::Child(child) => {
                    path.push(current);
                    current = child;
                }
                Route::Sibling(next) => current = next,
            }
        }
    }

    fn insert_into_leaf<'a>(
        &'a self,
        leaf: Uid,
        key: u64,
        uid: Uid,
        held: &mut SplitGuard<'a>,
    ) -> Result<Option<Split>> {
        let mut current = leaf;
        loop {
            let item = self.node(current)?;
            let mut guard = item.before();
            let slot = node::leaf_slot(&guard.data(), key);
            match slot {
                Slot::At(pos) => {
                    node::insert_at(&mut guard.data_mut(), pos, uid, key);
                    return self.commit_node(current, guard, held);
                }
                Slot::Sibling(next) => {
                    drop(guard);
                    current = next;
                }
            }
        }
    }

    fn insert_into_parent<'a>(
        &'a self,
        parent: Uid,
        split: Split,
        held: &mut SplitGuard<'a>,
    ) -> Result<Option<Split>> {
        let mut current = parent;
        loop {
            let item = self.node(current)?;
            let mut guard = item.before();
            let slot = node::child_slot(&guard.data(), split.left);
            match slot {
                ChildSlot::At(pos) => {
                    node::insert_separator(&mut guard.data_mut(), pos, split.sep, split.right);
                    return self.commit_node(current, guard, held);
                }
                ChildSlot::Sibling(next) => {
                    drop(guard);
                    current = next;
                }
                ChildSlot::Missing => {
                    return Err(KestrelError::Corruption("split node missing from parent level"))
                }
            }
        }
    }

    /// Finishes a node mutation, splitting the node first if it is full.
    fn commit_node<'a>(
        &'a self,
        uid: Uid,
        mut guard: ItemWriteGuard<'_>,
        held: &mut SplitGuard<'a>,
    ) -> Result<Option<Split>> {
        if !node::needs_split(&guard.data()) {
            guard.after(SUPER_XID)?;
            return Ok(None);
        }
        if held.is_none() {
            *held = Some(self.split_lock.lock());
        }
        let (right_raw, sep) = node::split_off(&mut guard.data_mut());
        let right = self.dm.insert(SUPER_XID, &right_raw)?;
        node::set_sibling(&mut guard.data_mut(), right);
        guard.after(SUPER_XID)?;
        debug!(left = %uid, right = %right, sep, "btree.split");
        Ok(Some(Split {
            left: uid,
            sep,
            right,
        }))
    }

    /// Installs a new root over a split root, or hands the split to the real
    /// parent if another thread already grew the tree.
    fn split_root<'a>(&'a self, split: Split, held: &mut SplitGuard<'a>) -> Result<Option<Split>> {
        let root = {
            let _boot = self.boot_lock.lock();
            let root = self.root_locked();
            if root == split.left {
                let new_root = self.dm.insert(
                    SUPER_XID,
                    &node::new_root(split.left, split.right, split.sep),
                )?;
                let mut guard = self.boot.before();
                guard.data_mut().copy_from_slice(&new_root.0.to_be_bytes());
                guard.after(SUPER_XID)?;
                debug!(root = %new_root, "btree.new_root");
                return Ok(None);
            }
            root
        };
        let parent = self.find_parent(root, split)?;
        self.insert_into_parent(parent, split, held)
    }

    /// Finds the internal node that lists `split.left` as a son.
    fn find_parent(&self, root: Uid, split: Split) -> Result<Uid> {
        let mut level = root;
        loop {
            let mut current = level;
            let next_level = loop {
                let slot = {
                    let item = self.node(current)?;
                    let raw = item.data();
                    if node::is_leaf(&raw) {
                        return Err(KestrelError::Corruption("split node has no parent"));
                    }
                    node::child_slot(&raw, split.left)
                };
                match slot {
                    ChildSlot::At(_) => return Ok(current),
                    ChildSlot::Sibling(next) => current = next,
                    ChildSlot::Missing => break self.route_down(level, split.sep)?,
                }
            };
            level = next_level;
        }
    }

    fn route_down(&self, from: Uid, key: u64) -> Result<Uid> {
        let mut current = from;
        loop {
            let item = self.node(current)?;
            let route = node::route(&item.data(), key)?;
            match route {
                Route::Child(child) => return Ok(child),
                Route::Sibling(next) => current = next,
            }
        }
    }
}

impl std::fmt::Debug for BPlusTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BPlusTree")
            .field("boot_uid", &self.boot_uid)
            .finish()
    }
}
