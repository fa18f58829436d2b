use crate::types::{KestrelError, PageNo, Result, Uid, Xid};

const TAG_INSERT: u8 = 0;
const TAG_UPDATE: u8 = 1;

/// A physical redo/undo record in the write-ahead log.
///
/// Insert: `[0][xid u64][page u32][offset u16][raw]`.
/// Update: `[1][xid u64][uid u64][len u16][old raw][new raw]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogRecord {
    /// A wrapped item was appended to a page.
    Insert {
        /// Inserting transaction.
        xid: Xid,
        /// Target page.
        page: PageNo,
        /// Offset the item was written at.
        offset: u16,
        /// Wrapped item bytes.
        raw: Vec<u8>,
    },
    /// An item was mutated in place through the before/after protocol.
    Update {
        /// Mutating transaction.
        xid: Xid,
        /// Address of the mutated item.
        uid: Uid,
        /// Wrapped item bytes before the mutation.
        old: Vec<u8>,
        /// Wrapped item bytes after the mutation.
        new: Vec<u8>,
    },
}

impl LogRecord {
    /// Transaction that produced the record.
    pub fn xid(&self) -> Xid {
        match self {
            LogRecord::Insert { xid, .. } | LogRecord::Update { xid, .. } => *xid,
        }
    }

    /// Page the record touches.
    pub fn page(&self) -> PageNo {
        match self {
            LogRecord::Insert { page, .. } => *page,
            LogRecord::Update { uid, .. } => uid.page(),
        }
    }

    /// Serializes the record payload (framing is added by the logger).
    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            LogRecord::Insert {
                xid,
                page,
                offset,
                raw,
            } => {
                let mut buf = Vec::with_capacity(15 + raw.len());
                buf.push(TAG_INSERT);
                buf.extend_from_slice(&xid.0.to_be_bytes());
                buf.extend_from_slice(&page.0.to_be_bytes());
                buf.extend_from_slice(&offset.to_be_bytes());
                buf.extend_from_slice(raw);
                Ok(buf)
            }
            LogRecord::Update { xid, uid, old, new } => {
                if old.len() != new.len() {
                    return Err(KestrelError::Invalid("update images differ in length"));
                }
                let len = u16::try_from(old.len())
                    .map_err(|_| KestrelError::Invalid("update image larger than a page"))?;
                let mut buf = Vec::with_capacity(19 + old.len() * 2);
                buf.push(TAG_UPDATE);
                buf.extend_from_slice(&xid.0.to_be_bytes());
                buf.extend_from_slice(&uid.0.to_be_bytes());
                buf.extend_from_slice(&len.to_be_bytes());
                buf.extend_from_slice(old);
                buf.extend_from_slice(new);
                Ok(buf)
            }
        }
    }

    /// Parses a record payload.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let (&tag, rest) = buf
            .split_first()
            .ok_or(KestrelError::Corruption("empty log record"))?;
        match tag {
            TAG_INSERT => {
                if rest.len() < 14 {
                    return Err(KestrelError::Corruption("insert record truncated"));
                }
                Ok(LogRecord::Insert {
                    xid: Xid(u64::from_be_bytes(rest[0..8].try_into().unwrap())),
                    page: PageNo(u32::from_be_bytes(rest[8..12].try_into().unwrap())),
                    offset: u16::from_be_bytes(rest[12..14].try_into().unwrap()),
                    raw: rest[14..].to_vec(),
                })
            }
            TAG_UPDATE => {
                if rest.len() < 18 {
                    return Err(KestrelError::Corruption("update record truncated"));
                }
                let len = usize::from(u16::from_be_bytes(rest[16..18].try_into().unwrap()));
                let images = &rest[18..];
                if images.len() != len * 2 {
                    return Err(KestrelError::Corruption("update record image length mismatch"));
                }
                Ok(LogRecord::Update {
                    xid: Xid(u64::from_be_bytes(rest[0..8].try_into().unwrap())),
                    uid: Uid(u64::from_be_bytes(rest[8..16].try_into().unwrap())),
                    old: images[..len].to_vec(),
                    new: images[len..].to_vec(),
                })
            }
            _ => Err(KestrelError::Corruption("unknown log record tag")),
        }
    }
}
