//! Superblock (page 1) open/close markers.
//!
//! Opening the database stamps fresh random bytes into the open marker; a clean
//! close copies them into the close marker. A mismatch on the next open means
//! the previous session crashed and recovery must run.

use std::ops::Range;

use rand::{rngs::OsRng, RngCore};

const OPEN_MARKER: Range<usize> = 100..108;
const CLOSE_MARKER: Range<usize> = 108..116;

/// Writes fresh random bytes into the open marker.
pub fn stamp_open(buf: &mut [u8]) {
    let mut rng = OsRng;
    rng.fill_bytes(&mut buf[OPEN_MARKER]);
}

/// Copies the open marker into the close marker.
pub fn stamp_close(buf: &mut [u8]) {
    buf.copy_within(OPEN_MARKER, CLOSE_MARKER.start);
}

/// Returns `true` when the last session ended with a clean close.
pub fn closed_cleanly(buf: &[u8]) -> bool {
    buf[OPEN_MARKER] == buf[CLOSE_MARKER]
}
