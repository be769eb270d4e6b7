//! In-memory LSM tree: the write path and read path without persistence.
//!
//! Architecture:
//! - SkipList: concurrent sorted map backing each memtable
//! - MemTable: skip list plus approximate size accounting
//! - LsmStorage: one mutable memtable and a newest-first list of frozen ones
//! - Iterators: merge (newest wins), tombstone filter, fused guard

mod types;
mod skiplist;
mod memtable;
mod iterator;
mod lsm;

pub use types::{Key, Value, Entry};
pub use skiplist::{SkipList, SkipListIterator};
pub use memtable::{MemTable, MemTableIterator};
pub use lsm::{
    FreezeListener, LsmConfig, LsmScanIterator, LsmStats, LsmStorage, LsmStorageState, LsmTree,
};
pub use iterator::{Entries, FusedIterator, LsmIterator, MergeIterator, StorageIterator};
