//! In-memory sorted table for fast writes.
//!
//! The MemTable stores the newest value of every key in a [`SkipList`].
//! A delete is a put of the empty value (a tombstone); interpreting
//! tombstones is up to the caller.

use std::ops::Bound;
use std::sync::atomic::{AtomicIsize, Ordering};

use super::iterator::{Entries, StorageIterator};
use super::skiplist::{SkipList, SkipListIterator};
use super::types::{Key, Value};

/// Cursor over a single memtable.
pub type MemTableIterator = SkipListIterator;

/// In-memory sorted table.
pub struct MemTable {
    id: usize,
    map: SkipList,
    /// Sum of key + value lengths, adjusted by deltas on overwrite.
    /// Signed because concurrent deltas may land out of order.
    approximate_size: AtomicIsize,
}

impl MemTable {
    /// Create an empty memtable with the given id.
    pub fn create(id: usize) -> Self {
        Self::with_map(id, SkipList::new())
    }

    /// Create an empty memtable whose skip list uses a fixed seed.
    pub fn with_seed(id: usize, seed: u64) -> Self {
        Self::with_map(id, SkipList::with_seed(seed))
    }

    fn with_map(id: usize, map: SkipList) -> Self {
        Self {
            id,
            map,
            approximate_size: AtomicIsize::new(0),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Put a key-value pair, overwriting any previous value.
    pub fn put(&self, key: Key, value: Value) {
        let key_len = key.len() as isize;
        let value_len = value.len() as isize;

        let delta = match self.map.insert(key.0, value.0) {
            Some(old) => value_len - old.len() as isize,
            None => key_len + value_len,
        };
        self.approximate_size.fetch_add(delta, Ordering::Relaxed);
    }

    /// Write a tombstone for `key`.
    pub fn delete(&self, key: Key) {
        self.put(key, Value::tombstone());
    }

    /// Raw lookup. A tombstone comes back as an empty value.
    pub fn get(&self, key: &[u8]) -> Option<Value> {
        self.map.contains(key).map(Value::new)
    }

    /// Cursor at the first entry.
    pub fn begin(&self) -> MemTableIterator {
        self.map.begin()
    }

    /// Cursor at the first entry inside `lower`.
    ///
    /// `upper` is advisory: the cursor runs to the end of the table and the
    /// caller stops at the bound (see [`super::iterator::LsmIterator`]).
    pub fn scan(&self, lower: Bound<&[u8]>, _upper: Bound<&[u8]>) -> MemTableIterator {
        match lower {
            Bound::Unbounded => self.map.begin(),
            Bound::Included(key) => self.map.scan(key),
            Bound::Excluded(key) => {
                let mut iter = self.map.scan(key);
                if iter.is_valid() && iter.key() == key {
                    iter.next();
                }
                iter
            }
        }
    }

    /// Iterate over all entries (tombstones included) in key order.
    pub fn iter(&self) -> Entries<MemTableIterator> {
        Entries::new(self.begin())
    }

    /// Number of entries, tombstones included.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Approximate size in bytes.
    pub fn approximate_size(&self) -> usize {
        self.approximate_size.load(Ordering::Relaxed).max(0) as usize
    }

    /// Clear the memtable.
    pub fn clear(&self) {
        self.map.clear();
        self.approximate_size.store(0, Ordering::Relaxed);
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::create(0)
    }
}
