//! Crash recovery: redo every insert and committed update, then undo
//! uncommitted work in reverse log order.
//!
//! Undo restores an update's old image only while the item still holds that
//! update's new image, so an aborted write never clobbers a later committed one.

use std::collections::BTreeSet;

use tracing::{debug, info};

use super::item;
use super::page as data_page;
use super::record::LogRecord;
use crate::primitives::pager::PageCache;
use crate::primitives::wal::Logger;
use crate::storage::txn::TransactionStatus;
use crate::types::{page::PAGE_SIZE, KestrelError, PageNo, Result};

/// Summary of one recovery pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Records read from the log.
    pub records: usize,
    /// Data file length in pages after recovery.
    pub pages: u32,
    /// Insert records replayed.
    pub redone_inserts: usize,
    /// Committed update records replayed.
    pub redone_updates: usize,
    /// Uncommitted updates rolled back to their old image.
    pub undone_updates: usize,
    /// Uncommitted updates left alone because a later write already replaced them.
    pub superseded_updates: usize,
    /// Uncommitted inserts marked invalid.
    pub undone_inserts: usize,
    /// Transactions forced from active to aborted.
    pub aborted: usize,
}

/// Replays `logger` against `pages`.
///
/// Must run before any page is pinned: the data file is truncated or extended
/// to the highest page the log references.
pub fn recover(
    pages: &PageCache,
    logger: &Logger,
    status: &dyn TransactionStatus,
) -> Result<RecoveryReport> {
    info!(log_len = logger.len(), "recovery.start");
    let records = logger
        .records()
        .map(|bytes| bytes.and_then(|b| LogRecord::decode(&b)))
        .collect::<Result<Vec<_>>>()?;

    let max_page = records
        .iter()
        .map(|rec| rec.page().0)
        .max()
        .unwrap_or(1)
        .max(1);
    pages.truncate(PageNo(max_page))?;

    let mut report = RecoveryReport {
        records: records.len(),
        pages: max_page,
        ..RecoveryReport::default()
    };

    for rec in &records {
        match rec {
            LogRecord::Insert {
                page, offset, raw, ..
            } => {
                with_page(pages, *page, *offset, raw.len(), |buf| {
                    data_page::recover_insert(buf, raw, *offset)
                })?;
                report.redone_inserts += 1;
            }
            LogRecord::Update { xid, uid, new, .. } if status.is_committed(*xid) => {
                with_page(pages, uid.page(), uid.offset(), new.len(), |buf| {
                    data_page::recover_update(buf, new, uid.offset())
                })?;
                report.redone_updates += 1;
            }
            LogRecord::Update { .. } => {}
        }
    }
    debug!(
        inserts = report.redone_inserts,
        updates = report.redone_updates,
        "recovery.redo.done"
    );

    for rec in records.iter().rev() {
        if status.is_committed(rec.xid()) {
            continue;
        }
        match rec {
            LogRecord::Update { uid, old, new, .. } => {
                let mut superseded = false;
                with_page(pages, uid.page(), uid.offset(), old.len(), |buf| {
                    let start = usize::from(uid.offset());
                    let current = &buf[start..start + new.len()];
                    if current == &new[..] {
                        data_page::recover_update(buf, old, uid.offset());
                    } else if current != &old[..] {
                        // A later writer replaced these bytes after this one gave up.
                        superseded = true;
                    }
                })?;
                if superseded {
                    report.superseded_updates += 1;
                } else {
                    report.undone_updates += 1;
                }
            }
            LogRecord::Insert {
                page, offset, raw, ..
            } => {
                with_page(pages, *page, *offset, raw.len(), |buf| {
                    let start = usize::from(*offset);
                    item::set_invalid(&mut buf[start..start + raw.len()]);
                })?;
                report.undone_inserts += 1;
            }
        }
    }
    debug!(
        updates = report.undone_updates,
        superseded = report.superseded_updates,
        inserts = report.undone_inserts,
        "recovery.undo.done"
    );

    let xids: BTreeSet<_> = records.iter().map(LogRecord::xid).collect();
    for xid in xids {
        if status.is_active(xid) {
            status.abort(xid)?;
            report.aborted += 1;
        }
    }
    info!(
        records = report.records,
        pages = report.pages,
        aborted = report.aborted,
        "recovery.done"
    );
    Ok(report)
}

fn with_page(
    pages: &PageCache,
    no: PageNo,
    offset: u16,
    len: usize,
    apply: impl FnOnce(&mut [u8]),
) -> Result<()> {
    if no.0 < 2 || usize::from(offset) < 2 || usize::from(offset) + len > PAGE_SIZE {
        return Err(KestrelError::Corruption("log record addresses bytes outside a data page"));
    }
    let page = pages.get(no)?;
    let mut buf = page.write();
    apply(&mut buf);
    Ok(())
}
