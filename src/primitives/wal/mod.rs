#![forbid(unsafe_code)]
//! Append-only write-ahead log.
//!
//! File layout: a 4-byte header holding the total valid length of the file
//! (header included), followed by frames of `[size u32][crc u32][payload]`.
//! Every append is forced to stable storage before it returns. On open the
//! frames are scanned; anything after the last frame whose length and checksum
//! verify is treated as a torn write and cut off.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::primitives::io::{FileIo, StdFileIo};
use crate::types::{record_crc32, KestrelError, Result};

const HEADER_LEN: u64 = 4;
const FRAME_HEADER_LEN: u64 = 8;

struct LogState {
    /// End of the last verified frame.
    end: u64,
    /// Position of the shared `next()` cursor.
    cursor: u64,
}

/// Write-ahead logger over a single file.
pub struct Logger {
    io: Arc<dyn FileIo>,
    state: Mutex<LogState>,
}

impl Logger {
    /// Creates a new, empty log file; fails with `FileExists` if present.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let io = StdFileIo::create_new(path.as_ref())?;
        Self::init(Arc::new(io))
    }

    /// Opens an existing log file, truncating any torn tail.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let io = StdFileIo::open_existing(path.as_ref())?;
        Self::with_io(Arc::new(io))
    }

    /// Opens a log for inspection; a torn tail is skipped but left on disk.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let io = StdFileIo::open_read_only(path.as_ref())?;
        Self::load(Arc::new(io), false)
    }

    /// Writes a fresh header into an empty file.
    pub fn init(io: Arc<dyn FileIo>) -> Result<Self> {
        io.truncate(0)?;
        write_header(io.as_ref(), HEADER_LEN)?;
        io.sync_data()?;
        info!("wal.create");
        Ok(Self {
            io,
            state: Mutex::new(LogState {
                end: HEADER_LEN,
                cursor: HEADER_LEN,
            }),
        })
    }

    /// Opens a log over an existing file, validating every frame.
    pub fn with_io(io: Arc<dyn FileIo>) -> Result<Self> {
        Self::load(io, true)
    }

    fn load(io: Arc<dyn FileIo>, repair: bool) -> Result<Self> {
        let file_len = io.len()?;
        if file_len < HEADER_LEN {
            return Err(KestrelError::Corruption("log file shorter than its header"));
        }
        let mut header = [0u8; HEADER_LEN as usize];
        io.read_at(0, &mut header)?;
        let recorded = u64::from(u32::from_be_bytes(header));

        let mut end = HEADER_LEN;
        let mut frames = 0u64;
        while let Some(next) = read_frame(io.as_ref(), end, file_len)?.map(|(next, _)| next) {
            end = next;
            frames += 1;
        }
        if recorded != end {
            debug!(recorded, verified = end, "wal.open.header_mismatch");
        }
        if end != file_len {
            warn!(
                file_len,
                valid_len = end,
                discarded = file_len - end,
                repair,
                "wal.open.torn_tail"
            );
        }
        if repair && end != file_len {
            io.truncate(end)?;
        }
        if repair && (recorded != end || end != file_len) {
            write_header(io.as_ref(), end)?;
            io.sync_data()?;
        }
        info!(frames, len = end, "wal.open");
        Ok(Self {
            io,
            state: Mutex::new(LogState {
                end,
                cursor: HEADER_LEN,
            }),
        })
    }

    /// Appends `payload` as one framed record and forces it to disk.
    pub fn log(&self, payload: &[u8]) -> Result<()> {
        let size = u32::try_from(payload.len())
            .map_err(|_| KestrelError::Invalid("log record larger than 4 GiB"))?;
        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN as usize + payload.len());
        frame.extend_from_slice(&size.to_be_bytes());
        frame.extend_from_slice(&record_crc32(payload).to_be_bytes());
        frame.extend_from_slice(payload);

        let mut state = self.state.lock();
        let new_end = state.end + frame.len() as u64;
        if new_end > u64::from(u32::MAX) {
            return Err(KestrelError::ResourceExhausted("log file reached 4 GiB"));
        }
        self.io.write_at(state.end, &frame)?;
        write_header(self.io.as_ref(), new_end)?;
        self.io.sync_data()?;
        state.end = new_end;
        Ok(())
    }

    /// Returns the next record from the shared cursor, or `None` at the end.
    pub fn next(&self) -> Result<Option<Vec<u8>>> {
        let mut state = self.state.lock();
        match read_frame(self.io.as_ref(), state.cursor, state.end)? {
            Some((next, payload)) => {
                state.cursor = next;
                Ok(Some(payload))
            }
            None => Ok(None),
        }
    }

    /// Moves the shared cursor back to the first record.
    pub fn rewind(&self) {
        self.state.lock().cursor = HEADER_LEN;
    }

    /// Truncates the log to `valid_len` bytes (header included).
    pub fn truncate(&self, valid_len: u64) -> Result<()> {
        if valid_len < HEADER_LEN {
            return Err(KestrelError::Invalid("log length shorter than header"));
        }
        let mut state = self.state.lock();
        self.io.truncate(valid_len)?;
        write_header(self.io.as_ref(), valid_len)?;
        self.io.sync_data()?;
        state.end = valid_len;
        state.cursor = state.cursor.min(valid_len);
        Ok(())
    }

    /// Valid length of the log in bytes, header included.
    pub fn len(&self) -> u64 {
        self.state.lock().end
    }

    /// Returns `true` when the log holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == HEADER_LEN
    }

    /// Independent forward reader over the records present right now.
    pub fn records(&self) -> LogReader<'_> {
        LogReader {
            logger: self,
            pos: HEADER_LEN,
            end: self.len(),
        }
    }

    /// Forces the log to stable storage.
    pub fn close(&self) -> Result<()> {
        self.io.sync_data()?;
        info!(len = self.len(), "wal.close");
        Ok(())
    }
}

/// Forward iterator over log records; see [`Logger::records`].
pub struct LogReader<'a> {
    logger: &'a Logger,
    pos: u64,
    end: u64,
}

impl Iterator for LogReader<'_> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        match read_frame(self.logger.io.as_ref(), self.pos, self.end) {
            Ok(Some((next, payload))) => {
                self.pos = next;
                Some(Ok(payload))
            }
            Ok(None) => None,
            Err(err) => {
                self.pos = self.end;
                Some(Err(err))
            }
        }
    }
}

fn write_header(io: &dyn FileIo, len: u64) -> Result<()> {
    let len = u32::try_from(len).map_err(|_| KestrelError::Corruption("log length overflow"))?;
    io.write_at(0, &len.to_be_bytes())
}

/// Reads the frame at `pos`, returning the offset after it and its payload.
///
/// Returns `None` when no complete, checksum-valid frame starts at `pos`.
fn read_frame(io: &dyn FileIo, pos: u64, end: u64) -> Result<Option<(u64, Vec<u8>)>> {
    if pos + FRAME_HEADER_LEN > end {
        return Ok(None);
    }
    let mut header = [0u8; FRAME_HEADER_LEN as usize];
    io.read_at(pos, &mut header)?;
    let size = u64::from(u32::from_be_bytes(header[0..4].try_into().unwrap()));
    let crc = u32::from_be_bytes(header[4..8].try_into().unwrap());
    let next = pos + FRAME_HEADER_LEN + size;
    if next > end {
        return Ok(None);
    }
    let mut payload = vec![0u8; size as usize];
    io.read_at(pos + FRAME_HEADER_LEN, &mut payload)?;
    if record_crc32(&payload) != crc {
        return Ok(None);
    }
    Ok(Some((next, payload)))
}
