//! Cursor-style iterators and the combinators that stack on top of them.
//!
//! Range scans merge the mutable memtable with every frozen one:
//!
//! ```text
//! FusedIterator<LsmIterator<MergeIterator<MemTableIterator>>>
//! ```
//!
//! `MergeIterator` resolves duplicate keys in favour of the newest source,
//! `LsmIterator` hides tombstones, and `FusedIterator` keeps an exhausted
//! scan exhausted.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::collections::binary_heap::PeekMut;
use std::ops::Bound;

use bytes::Bytes;

use super::types::{Entry, Key, Value};

/// A positioned cursor over sorted key/value pairs.
///
/// `key` and `value` return empty slices once the cursor is invalid, and
/// `next` on an invalid cursor does nothing.
pub trait StorageIterator {
    fn key(&self) -> &[u8];

    fn value(&self) -> &[u8];

    fn is_valid(&self) -> bool;

    fn next(&mut self);
}

impl<I: StorageIterator + ?Sized> StorageIterator for Box<I> {
    fn key(&self) -> &[u8] {
        (**self).key()
    }

    fn value(&self) -> &[u8] {
        (**self).value()
    }

    fn is_valid(&self) -> bool {
        (**self).is_valid()
    }

    fn next(&mut self) {
        (**self).next()
    }
}

/// A source cursor tagged with its position in the merge.
/// Lower index means newer data.
struct HeapEntry<I: StorageIterator> {
    index: usize,
    iter: Box<I>,
}

impl<I: StorageIterator> PartialEq for HeapEntry<I> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<I: StorageIterator> Eq for HeapEntry<I> {}

impl<I: StorageIterator> Ord for HeapEntry<I> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap behavior:
        // smallest key first, then lowest (newest) index.
        self.iter
            .key()
            .cmp(other.iter.key())
            .then(self.index.cmp(&other.index))
            .reverse()
    }
}

impl<I: StorageIterator> PartialOrd for HeapEntry<I> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Merge iterator that combines multiple sorted cursors into one.
///
/// Source 0 holds the newest data. When several sources hold the same key,
/// only the newest one's value is emitted and the older copies are skipped.
pub struct MergeIterator<I: StorageIterator> {
    heap: BinaryHeap<HeapEntry<I>>,
    current: Option<HeapEntry<I>>,
}

impl<I: StorageIterator> MergeIterator<I> {
    /// Create a merge iterator from sources ordered newest first.
    pub fn new(sources: Vec<Box<I>>) -> Self {
        let mut heap: BinaryHeap<_> = sources
            .into_iter()
            .enumerate()
            .filter(|(_, iter)| iter.is_valid())
            .map(|(index, iter)| HeapEntry { index, iter })
            .collect();
        let current = heap.pop();
        Self { heap, current }
    }

    /// Number of sources that still have entries ahead of them.
    pub fn num_active_sources(&self) -> usize {
        self.heap.len() + usize::from(self.current.is_some())
    }
}

impl<I: StorageIterator> StorageIterator for MergeIterator<I> {
    fn key(&self) -> &[u8] {
        self.current.as_ref().map(|c| c.iter.key()).unwrap_or(&[])
    }

    fn value(&self) -> &[u8] {
        self.current.as_ref().map(|c| c.iter.value()).unwrap_or(&[])
    }

    fn is_valid(&self) -> bool {
        self.current.as_ref().is_some_and(|c| c.iter.is_valid())
    }

    fn next(&mut self) {
        let Some(current) = self.current.as_mut() else {
            return;
        };

        // Older sources holding the key we just emitted step past it.
        while let Some(mut top) = self.heap.peek_mut() {
            if top.iter.key() != current.iter.key() {
                break;
            }
            top.iter.next();
            if !top.iter.is_valid() {
                PeekMut::pop(top);
            }
            // Otherwise dropping `top` sifts it back into place.
        }

        current.iter.next();

        if !current.iter.is_valid() {
            self.current = self.heap.pop();
            return;
        }

        if let Some(mut top) = self.heap.peek_mut() {
            if *current < *top {
                std::mem::swap(&mut *top, current);
            }
        }
    }
}

/// Hides tombstones and stops at an optional upper bound.
pub struct LsmIterator<I: StorageIterator> {
    inner: I,
    end: Bound<Bytes>,
    is_valid: bool,
}

impl<I: StorageIterator> LsmIterator<I> {
    /// Wrap `inner` with no upper bound.
    pub fn new(inner: I) -> Self {
        Self::with_end(inner, Bound::Unbounded)
    }

    /// Wrap `inner`, ending the scan at `end`.
    pub fn with_end(inner: I, end: Bound<Bytes>) -> Self {
        let mut iter = Self {
            inner,
            end,
            is_valid: false,
        };
        iter.skip_deleted_keys();
        iter
    }

    fn within_end(&self) -> bool {
        match &self.end {
            Bound::Unbounded => true,
            Bound::Included(end) => self.inner.key() <= end.as_ref(),
            Bound::Excluded(end) => self.inner.key() < end.as_ref(),
        }
    }

    fn skip_deleted_keys(&mut self) {
        while self.inner.is_valid() && self.inner.value().is_empty() {
            self.inner.next();
        }
        self.is_valid = self.inner.is_valid() && self.within_end();
    }
}

impl<I: StorageIterator> StorageIterator for LsmIterator<I> {
    fn key(&self) -> &[u8] {
        if self.is_valid { self.inner.key() } else { &[] }
    }

    fn value(&self) -> &[u8] {
        if self.is_valid { self.inner.value() } else { &[] }
    }

    fn is_valid(&self) -> bool {
        self.is_valid
    }

    fn next(&mut self) {
        if !self.is_valid {
            return;
        }
        self.inner.next();
        self.skip_deleted_keys();
    }
}

/// Guard that never lets an exhausted cursor come back to life.
pub struct FusedIterator<I: StorageIterator> {
    inner: I,
    exhausted: bool,
}

impl<I: StorageIterator> FusedIterator<I> {
    pub fn new(inner: I) -> Self {
        let exhausted = !inner.is_valid();
        Self { inner, exhausted }
    }
}

impl<I: StorageIterator> StorageIterator for FusedIterator<I> {
    fn key(&self) -> &[u8] {
        if self.is_valid() { self.inner.key() } else { &[] }
    }

    fn value(&self) -> &[u8] {
        if self.is_valid() { self.inner.value() } else { &[] }
    }

    fn is_valid(&self) -> bool {
        !self.exhausted && self.inner.is_valid()
    }

    fn next(&mut self) {
        if !self.is_valid() {
            self.exhausted = true;
            return;
        }
        self.inner.next();
        if !self.inner.is_valid() {
            self.exhausted = true;
        }
    }
}

/// Adapts a cursor into a std [`Iterator`] of owned entries.
pub struct Entries<I: StorageIterator> {
    inner: I,
}

impl<I: StorageIterator> Entries<I> {
    pub fn new(inner: I) -> Self {
        Self { inner }
    }
}

impl<I: StorageIterator> Iterator for Entries<I> {
    type Item = Entry;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.inner.is_valid() {
            return None;
        }
        let entry = Entry::new(
            Key::from_slice(self.inner.key()),
            Value::from_slice(self.inner.value()),
        );
        self.inner.next();
        Some(entry)
    }
}
