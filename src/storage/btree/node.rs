//! On-disk node format.
//!
//! `[is_leaf u8][key_count u16][sibling u64]` followed by `(son u64, key u64)`
//! pairs. In a leaf, `son` is the indexed uid. In an internal node, `key` is
//! the inclusive upper bound of everything under `son`, and the last key of the
//! rightmost node on each level is `u64::MAX`.

use std::ops::Range;

use crate::types::{KestrelError, Result, Uid};

const IS_LEAF: usize = 0;
const KEY_COUNT: Range<usize> = 1..3;
const SIBLING: Range<usize> = 3..11;
const HEADER_LEN: usize = 11;
const PAIR_LEN: usize = 16;

/// Half the split threshold: a node splits when it reaches `2 * BALANCE` keys.
pub const BALANCE: usize = 32;
/// Fixed payload size of every node.
pub const NODE_SIZE: usize = HEADER_LEN + PAIR_LEN * (2 * BALANCE + 2);

/// Upper bound of the rightmost child on each internal level.
pub const INF_KEY: u64 = u64::MAX;

pub fn is_leaf(raw: &[u8]) -> bool {
    raw[IS_LEAF] == 1
}

pub fn key_count(raw: &[u8]) -> usize {
    usize::from(u16::from_be_bytes(raw[KEY_COUNT].try_into().unwrap()))
}

fn set_key_count(raw: &mut [u8], n: usize) {
    raw[KEY_COUNT].copy_from_slice(&(n as u16).to_be_bytes());
}

pub fn sibling(raw: &[u8]) -> Uid {
    Uid(u64::from_be_bytes(raw[SIBLING].try_into().unwrap()))
}

pub fn set_sibling(raw: &mut [u8], uid: Uid) {
    raw[SIBLING].copy_from_slice(&uid.0.to_be_bytes());
}

fn pair_at(i: usize) -> usize {
    HEADER_LEN + i * PAIR_LEN
}

pub fn son(raw: &[u8], i: usize) -> Uid {
    let at = pair_at(i);
    Uid(u64::from_be_bytes(raw[at..at + 8].try_into().unwrap()))
}

pub fn key(raw: &[u8], i: usize) -> u64 {
    let at = pair_at(i) + 8;
    u64::from_be_bytes(raw[at..at + 8].try_into().unwrap())
}

fn set_pair(raw: &mut [u8], i: usize, son: Uid, key: u64) {
    let at = pair_at(i);
    raw[at..at + 8].copy_from_slice(&son.0.to_be_bytes());
    raw[at + 8..at + 16].copy_from_slice(&key.to_be_bytes());
}

fn set_key(raw: &mut [u8], i: usize, key: u64) {
    let at = pair_at(i) + 8;
    raw[at..at + 8].copy_from_slice(&key.to_be_bytes());
}

/// Moves pairs `[from, n)` one slot to the right.
fn shift_right(raw: &mut [u8], from: usize, n: usize) {
    raw.copy_within(pair_at(from)..pair_at(n), pair_at(from + 1));
}

fn blank(leaf: bool) -> Vec<u8> {
    let mut raw = vec![0u8; NODE_SIZE];
    raw[IS_LEAF] = u8::from(leaf);
    raw
}

/// Image of an empty leaf root.
pub fn empty_root() -> Vec<u8> {
    blank(true)
}

/// Image of a two-child internal root over `left` (bounded by `key`) and `right`.
pub fn new_root(left: Uid, right: Uid, key: u64) -> Vec<u8> {
    let mut raw = blank(false);
    set_pair(&mut raw, 0, left, key);
    set_pair(&mut raw, 1, right, INF_KEY);
    set_key_count(&mut raw, 2);
    raw
}

/// Next hop when descending an internal node toward `target`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    /// Descend into this child.
    Child(Uid),
    /// The target lies beyond this node; continue on its right sibling.
    Sibling(Uid),
}

/// Routes to the first child whose bound is `>= target`.
pub fn route(raw: &[u8], target: u64) -> Result<Route> {
    let n = key_count(raw);
    match (0..n).find(|&i| key(raw, i) >= target) {
        Some(i) => Ok(Route::Child(son(raw, i))),
        None => match sibling(raw) {
            next if !next.is_null() => Ok(Route::Sibling(next)),
            _ => Err(KestrelError::Corruption("internal node has no route for key")),
        },
    }
}

/// Where a key belongs in a leaf.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot {
    /// Insert at this index.
    At(usize),
    /// Every key here is smaller and a right sibling exists; retry there.
    Sibling(Uid),
}

/// Finds the insertion slot for `target`: before the first key `>= target`.
pub fn leaf_slot(raw: &[u8], target: u64) -> Slot {
    let n = key_count(raw);
    match (0..n).find(|&i| key(raw, i) >= target) {
        Some(i) => Slot::At(i),
        None => match sibling(raw) {
            next if !next.is_null() => Slot::Sibling(next),
            _ => Slot::At(n),
        },
    }
}

/// Inserts `(son, key)` at `pos`, shifting later pairs right.
pub fn insert_at(raw: &mut [u8], pos: usize, son: Uid, key: u64) {
    let n = key_count(raw);
    shift_right(raw, pos, n);
    set_pair(raw, pos, son, key);
    set_key_count(raw, n + 1);
}

/// Locates `child` among an internal node's sons.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChildSlot {
    /// `child` is the son at this index.
    At(usize),
    /// Not here; keep looking on the right sibling.
    Sibling(Uid),
    /// Not on this level at all.
    Missing,
}

pub fn child_slot(raw: &[u8], child: Uid) -> ChildSlot {
    let n = key_count(raw);
    match (0..n).find(|&i| son(raw, i) == child) {
        Some(i) => ChildSlot::At(i),
        None => match sibling(raw) {
            next if !next.is_null() => ChildSlot::Sibling(next),
            _ => ChildSlot::Missing,
        },
    }
}

/// Records that the son at `pos` split at `sep`, with the upper half now in `right`.
///
/// The son keeps bound `sep`; `right` inherits the son's previous bound.
pub fn insert_separator(raw: &mut [u8], pos: usize, sep: u64, right: Uid) {
    let old_bound = key(raw, pos);
    set_key(raw, pos, sep);
    insert_at(raw, pos + 1, right, old_bound);
}

/// Returns `true` once the node has reached the split threshold.
pub fn needs_split(raw: &[u8]) -> bool {
    key_count(raw) >= 2 * BALANCE
}

/// Moves the upper `BALANCE` pairs into a new node image.
///
/// Returns that image, which inherits the old sibling link, and the separator:
/// the largest key left behind. The caller links the left node to the new one.
pub fn split_off(raw: &mut [u8]) -> (Vec<u8>, u64) {
    let n = key_count(raw);
    let mut right = blank(is_leaf(raw));
    right[pair_at(0)..pair_at(n - BALANCE)].copy_from_slice(&raw[pair_at(BALANCE)..pair_at(n)]);
    set_key_count(&mut right, n - BALANCE);
    set_sibling(&mut right, sibling(raw));
    set_key_count(raw, BALANCE);
    (right, key(raw, BALANCE - 1))
}

/// Outcome of scanning one leaf for a key range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scan {
    /// The range ended inside this leaf.
    Done,
    /// Keys ran out before the range did; continue on this sibling.
    Continue(Uid),
}

/// Appends the sons whose keys fall in `lo..=hi`.
pub fn collect_range(raw: &[u8], lo: u64, hi: u64, out: &mut Vec<Uid>) -> Scan {
    for i in 0..key_count(raw) {
        let k = key(raw, i);
        if k > hi {
            return Scan::Done;
        }
        if k >= lo {
            out.push(son(raw, i));
        }
    }
    match sibling(raw) {
        next if !next.is_null() => Scan::Continue(next),
        _ => Scan::Done,
    }
}
