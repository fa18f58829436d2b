use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::types::PageNo;

/// In-memory image of one data-file page.
///
/// The dirty flag is raised only while the buffer's write lock is held and is
/// cleared only under the read lock, so a write-back never loses a concurrent
/// modification.
pub struct Page {
    no: PageNo,
    buf: RwLock<Box<[u8]>>,
    dirty: AtomicBool,
}

impl Page {
    pub(crate) fn new(no: PageNo, buf: Box<[u8]>) -> Self {
        Self {
            no,
            buf: RwLock::new(buf),
            dirty: AtomicBool::new(false),
        }
    }

    /// Page number of this image.
    pub fn no(&self) -> PageNo {
        self.no
    }

    /// Shared access to the page bytes.
    pub fn read(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.buf.read()
    }

    /// Exclusive access to the page bytes; marks the page dirty.
    pub fn write(&self) -> RwLockWriteGuard<'_, Box<[u8]>> {
        let guard = self.buf.write();
        self.dirty.store(true, Ordering::Release);
        guard
    }

    /// Returns `true` if the image differs from what is on disk.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Clears the dirty flag, returning its previous value. Caller must hold a read guard.
    pub(crate) fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    /// Re-raises the dirty flag after a failed write-back.
    pub(crate) fn restore_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }
}
