//! Layout of ordinary data pages: a `u16` free-space offset at `[0, 2)`
//! followed by DataItems in insertion order.

use std::ops::Range;

use crate::types::page::PAGE_SIZE;

const FSO: Range<usize> = 0..2;
/// Bytes of a page that are not taken by the free-space offset.
pub const MAX_FREE_SPACE: usize = PAGE_SIZE - FSO.end;

/// Image of a freshly allocated, empty data page.
pub fn init_raw() -> [u8; 2] {
    (FSO.end as u16).to_be_bytes()
}

/// Offset at which the next item will be appended.
pub fn fso(buf: &[u8]) -> u16 {
    u16::from_be_bytes(buf[FSO].try_into().unwrap())
}

fn set_fso(buf: &mut [u8], value: u16) {
    buf[FSO].copy_from_slice(&value.to_be_bytes());
}

/// Bytes still available for new items.
pub fn free_space(buf: &[u8]) -> usize {
    PAGE_SIZE.saturating_sub(usize::from(fso(buf)).max(FSO.end))
}

/// Appends `raw` at the free-space offset and returns where it landed.
///
/// Caller must have checked `raw.len() <= free_space(buf)`.
pub fn append(buf: &mut [u8], raw: &[u8]) -> u16 {
    let offset = fso(buf).max(FSO.end as u16);
    let start = usize::from(offset);
    buf[start..start + raw.len()].copy_from_slice(raw);
    set_fso(buf, offset + raw.len() as u16);
    offset
}

/// Replays an insert at a fixed offset, raising the free-space offset if needed.
pub fn recover_insert(buf: &mut [u8], raw: &[u8], offset: u16) {
    let start = usize::from(offset);
    buf[start..start + raw.len()].copy_from_slice(raw);
    let end = offset + raw.len() as u16;
    if fso(buf) < end {
        set_fso(buf, end);
    }
}

/// Replays an in-place update; never moves the free-space offset.
pub fn recover_update(buf: &mut [u8], raw: &[u8], offset: u16) {
    let start = usize::from(offset);
    buf[start..start + raw.len()].copy_from_slice(raw);
}
