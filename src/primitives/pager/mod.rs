#![forbid(unsafe_code)]

mod frame;
mod meta;
mod pager;

pub use frame::Page;
pub use meta::{closed_cleanly, stamp_close, stamp_open};
pub use pager::{PageCache, PageHandle, PageStore, PagerOptions, PagerStats};
