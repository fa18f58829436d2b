#![forbid(unsafe_code)]
//! Checksums guarding log frames.

/// Incremental checksum over byte chunks.
pub trait Checksum {
    /// Feeds `bytes` into the running checksum.
    fn update(&mut self, bytes: &[u8]);
    /// Returns the checksum of everything fed so far without consuming it.
    fn finalize(&self) -> u32;
}

/// CRC-32 backed by `crc32fast`.
pub struct Crc32Fast {
    inner: crc32fast::Hasher,
}

impl Default for Crc32Fast {
    fn default() -> Self {
        Self {
            inner: crc32fast::Hasher::new(),
        }
    }
}

impl Checksum for Crc32Fast {
    fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    fn finalize(&self) -> u32 {
        self.inner.clone().finalize()
    }
}

/// Checksum of a log record body, seeded with its length so that a zero-filled
/// tail never validates as an empty record.
pub fn record_crc32(payload: &[u8]) -> u32 {
    let mut hasher = Crc32Fast::default();
    hasher.update(&(payload.len() as u32).to_be_bytes());
    hasher.update(payload);
    hasher.finalize()
}
