#![forbid(unsafe_code)]

//! B+ tree secondary index stored as DataItems.

mod node;
mod tree;

pub use node::{BALANCE, NODE_SIZE};
pub use tree::BPlusTree;
