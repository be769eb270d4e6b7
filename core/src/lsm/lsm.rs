//! LSM storage - coordinator for the mutable memtable and its frozen
//! predecessors.
//!
//! Writes land in the mutable memtable only. Once it grows past the target
//! size (or on request) it is frozen: moved to the front of the immutable
//! list and replaced by an empty table. Reads walk mutable → newest frozen →
//! oldest frozen and stop at the first table that knows the key.

use std::iter;
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard, RwLock};

use super::iterator::{Entries, FusedIterator, LsmIterator, MergeIterator};
use super::memtable::{MemTable, MemTableIterator};
use super::types::{Key, Value};
use crate::constants::DEFAULT_TARGET_MEMTABLE_SIZE;

/// Cursor returned by range scans.
pub type LsmScanIterator = FusedIterator<LsmIterator<MergeIterator<MemTableIterator>>>;

/// Called with every memtable right after it is frozen.
pub type FreezeListener = Box<dyn Fn(&Arc<MemTable>) + Send + Sync>;

/// Configuration for the LSM tree.
#[derive(Clone, Debug)]
pub struct LsmConfig {
    /// Freeze the mutable memtable once its approximate size reaches this.
    pub target_memtable_size: usize,
}

impl Default for LsmConfig {
    fn default() -> Self {
        Self {
            target_memtable_size: DEFAULT_TARGET_MEMTABLE_SIZE,
        }
    }
}

/// The set of memtables visible to readers at one point in time.
#[derive(Clone)]
pub struct LsmStorageState {
    /// The only table that accepts writes.
    pub memtable: Arc<MemTable>,
    /// Frozen memtables, newest first.
    pub imm_memtables: Vec<Arc<MemTable>>,
}

impl LsmStorageState {
    fn create() -> Self {
        Self {
            memtable: Arc::new(MemTable::create(0)),
            imm_memtables: Vec::new(),
        }
    }

    /// All tables, newest first.
    fn tables(&self) -> impl Iterator<Item = &Arc<MemTable>> {
        iter::once(&self.memtable).chain(self.imm_memtables.iter())
    }
}

/// The storage state machine behind [`LsmTree`].
pub struct LsmStorage {
    state: RwLock<Arc<LsmStorageState>>,
    /// Serialises freezes. Readers and writers never take it.
    state_lock: Mutex<()>,
    target_memtable_size: AtomicUsize,
    next_memtable_id: AtomicUsize,
    freeze_listeners: RwLock<Vec<FreezeListener>>,
}

impl LsmStorage {
    pub fn open(config: LsmConfig) -> Self {
        Self {
            state: RwLock::new(Arc::new(LsmStorageState::create())),
            state_lock: Mutex::new(()),
            target_memtable_size: AtomicUsize::new(config.target_memtable_size),
            next_memtable_id: AtomicUsize::new(1),
            freeze_listeners: RwLock::new(Vec::new()),
        }
    }

    /// Current state. The returned snapshot does not change under later
    /// freezes, but its mutable memtable keeps receiving writes until then.
    pub fn state(&self) -> Arc<LsmStorageState> {
        Arc::clone(&self.state.read())
    }

    /// Get the latest value for a key.
    /// Returns None if not found or deleted.
    pub fn get(&self, key: &[u8]) -> Option<Value> {
        let snapshot = self.state();
        // The first table holding the key decides, tombstone or not.
        let value = snapshot.tables().find_map(|table| table.get(key))?;
        (!value.is_tombstone()).then_some(value)
    }

    /// Put a key-value pair. An empty value deletes the key.
    pub fn put(&self, key: Key, value: Value) {
        let estimated_size = {
            // Holding the read guard keeps a concurrent freeze from detaching
            // the table while we write into it.
            let guard = self.state.read();
            guard.memtable.put(key, value);
            guard.memtable.approximate_size()
        };
        self.try_freeze(estimated_size);
    }

    /// Delete a key.
    pub fn delete(&self, key: Key) {
        self.put(key, Value::tombstone());
    }

    /// Scan live entries from `lower` to `upper` across all memtables.
    pub fn scan(&self, lower: Bound<&[u8]>, upper: Bound<&[u8]>) -> LsmScanIterator {
        let snapshot = self.state();
        let sources: Vec<Box<MemTableIterator>> = snapshot
            .tables()
            .map(|table| Box::new(table.scan(lower, upper)))
            .collect();
        let end = upper.map(Bytes::copy_from_slice);
        FusedIterator::new(LsmIterator::with_end(MergeIterator::new(sources), end))
    }

    fn try_freeze(&self, estimated_size: usize) {
        let target = self.target_memtable_size();
        if estimated_size < target {
            return;
        }
        let state_lock = self.state_lock.lock();
        // Another writer may have frozen it while we waited for the lock.
        if self.state.read().memtable.approximate_size() >= target {
            self.freeze_memtable(&state_lock, "size limit");
        }
    }

    /// Freeze the mutable memtable regardless of its size.
    pub fn force_freeze(&self) {
        let state_lock = self.state_lock.lock();
        self.freeze_memtable(&state_lock, "forced");
    }

    fn freeze_memtable(&self, _state_lock_observer: &MutexGuard<'_, ()>, reason: &'static str) {
        let memtable_id = self.next_memtable_id.fetch_add(1, Ordering::SeqCst);
        let fresh = Arc::new(MemTable::create(memtable_id));

        let (frozen, imm_count) = {
            let mut guard = self.state.write();
            let mut snapshot = guard.as_ref().clone();
            let frozen = std::mem::replace(&mut snapshot.memtable, fresh);
            snapshot.imm_memtables.insert(0, Arc::clone(&frozen));
            let imm_count = snapshot.imm_memtables.len();
            *guard = Arc::new(snapshot);
            (frozen, imm_count)
        };

        tracing::info!(
            memtable_id = frozen.id(),
            size = frozen.approximate_size(),
            entries = frozen.len(),
            imm_count,
            reason,
            "froze memtable"
        );

        for listener in self.freeze_listeners.read().iter() {
            listener(&frozen);
        }
    }

    /// Register a callback run after every freeze, in freeze order.
    ///
    /// Listeners run while the freeze lock is held: they must not write to
    /// this storage or register further listeners.
    pub fn on_freeze<F>(&self, listener: F)
    where
        F: Fn(&Arc<MemTable>) + Send + Sync + 'static,
    {
        let mut listeners = self.freeze_listeners.write();
        listeners.push(Box::new(listener));
        tracing::debug!(listeners = listeners.len(), "registered freeze listener");
    }

    pub fn target_memtable_size(&self) -> usize {
        self.target_memtable_size.load(Ordering::Relaxed)
    }

    /// Change the freeze threshold. Takes effect on the next write.
    pub fn set_target_memtable_size(&self, size: usize) {
        let previous = self.target_memtable_size.swap(size, Ordering::Relaxed);
        tracing::debug!(previous, size, "target memtable size changed");
    }

    /// Approximate size of the mutable memtable.
    pub fn memtable_size(&self) -> usize {
        self.state.read().memtable.approximate_size()
    }

    pub fn imm_memtable_count(&self) -> usize {
        self.state.read().imm_memtables.len()
    }

    /// Approximate size of the frozen memtable at `index` (0 = newest).
    pub fn imm_memtable_size(&self, index: usize) -> Option<usize> {
        self.state
            .read()
            .imm_memtables
            .get(index)
            .map(|table| table.approximate_size())
    }

    /// Get statistics about the LSM tree.
    pub fn stats(&self) -> LsmStats {
        let snapshot = self.state();
        LsmStats {
            memtable_entries: snapshot.memtable.len(),
            memtable_size_bytes: snapshot.memtable.approximate_size(),
            imm_memtable_count: snapshot.imm_memtables.len(),
            total_entries: snapshot.tables().map(|table| table.len()).sum(),
        }
    }
}

/// LSM Tree key-value store: a cloneable handle over [`LsmStorage`].
#[derive(Clone)]
pub struct LsmTree {
    inner: Arc<LsmStorage>,
}

impl LsmTree {
    pub fn open(config: LsmConfig) -> Self {
        Self {
            inner: Arc::new(LsmStorage::open(config)),
        }
    }

    pub fn get(&self, key: impl AsRef<[u8]>) -> Option<Value> {
        self.inner.get(key.as_ref())
    }

    pub fn put(&self, key: impl Into<Key>, value: impl Into<Value>) {
        self.inner.put(key.into(), value.into());
    }

    pub fn delete(&self, key: impl Into<Key>) {
        self.inner.delete(key.into());
    }

    /// Range scan; the cursor hides deleted keys.
    pub fn scan(&self, lower: Bound<&[u8]>, upper: Bound<&[u8]>) -> LsmScanIterator {
        self.inner.scan(lower, upper)
    }

    /// Scan every live entry.
    pub fn scan_live(&self) -> Entries<LsmScanIterator> {
        Entries::new(self.scan(Bound::Unbounded, Bound::Unbounded))
    }

    pub fn stats(&self) -> LsmStats {
        self.inner.stats()
    }

    /// The underlying storage, for freeze control and inspection.
    pub fn storage(&self) -> &LsmStorage {
        &self.inner
    }
}

/// Statistics about the LSM tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LsmStats {
    pub memtable_entries: usize,
    pub memtable_size_bytes: usize,
    pub imm_memtable_count: usize,
    /// Entries across all memtables, tombstones and shadowed versions included.
    pub total_entries: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsm::iterator::StorageIterator;
    use std::thread;

    fn small_tree(target: usize) -> LsmTree {
        LsmTree::open(LsmConfig {
            target_memtable_size: target,
        })
    }

    fn live_keys(tree: &LsmTree) -> Vec<String> {
        tree.scan_live()
            .map(|e| String::from_utf8(e.key.as_bytes().to_vec()).unwrap())
            .collect()
    }

    #[test]
    fn test_basic_put_get() {
        let lsm = LsmTree::open(LsmConfig::default());
        assert!(lsm.get("0").is_none());

        lsm.put("1", "233");
        lsm.put("2", "2333");
        lsm.put("3", "23333");

        assert_eq!(lsm.get("1"), Some(Value::from("233")));
        assert_eq!(lsm.get("2"), Some(Value::from("2333")));
        assert_eq!(lsm.get("3"), Some(Value::from("23333")));
    }

    #[test]
    fn test_overwrite() {
        let lsm = LsmTree::open(LsmConfig::default());
        lsm.put("key", "v1");
        lsm.put("key", "v2");
        assert_eq!(lsm.get("key"), Some(Value::from("v2")));
    }

    #[test]
    fn test_delete() {
        let lsm = LsmTree::open(LsmConfig::default());
        lsm.put("key", "value");
        lsm.delete("key");
        assert!(lsm.get("key").is_none());

        // Deleting a key that never existed is fine.
        lsm.delete("missing");
        assert!(lsm.get("missing").is_none());
    }

    #[test]
    fn test_tombstone_masks_frozen_value() {
        let lsm = LsmTree::open(LsmConfig::default());
        lsm.put("k", "v");
        lsm.storage().force_freeze();
        lsm.delete("k");

        assert!(lsm.get("k").is_none());
        // The frozen table still holds the old value.
        let state = lsm.storage().state();
        assert_eq!(state.imm_memtables[0].get(b"k"), Some(Value::from("v")));
    }

    #[test]
    fn test_first_hit_wins_across_frozen_tables() {
        let lsm = LsmTree::open(LsmConfig::default());

        lsm.put("a", "old");
        lsm.put("b", "old");
        lsm.storage().force_freeze();
        lsm.delete("a");
        lsm.put("b", "new");
        lsm.storage().force_freeze();

        // Newest frozen table decides for both keys.
        assert!(lsm.get("a").is_none());
        assert_eq!(lsm.get("b"), Some(Value::from("new")));

        // A live write in the mutable table beats a frozen tombstone.
        lsm.put("a", "again");
        assert_eq!(lsm.get("a"), Some(Value::from("again")));
    }

    #[test]
    fn test_force_freeze_rotation() {
        let lsm = LsmTree::open(LsmConfig::default());
        let storage = lsm.storage();
        lsm.put("key1", "value1");
        let before = storage.state().memtable.id();

        storage.force_freeze();

        assert_eq!(storage.imm_memtable_count(), 1);
        assert_eq!(storage.memtable_size(), 0);
        assert!(storage.state().memtable.is_empty());
        assert_ne!(storage.state().memtable.id(), before);
        assert_eq!(storage.state().imm_memtables[0].id(), before);
        assert_eq!(lsm.get("key1"), Some(Value::from("value1")));

        // Empty tables rotate too.
        storage.force_freeze();
        assert_eq!(storage.imm_memtable_count(), 2);
        assert_eq!(storage.imm_memtable_size(0), Some(0));
        assert!(storage.imm_memtable_size(5).is_none());
    }

    #[test]
    fn test_size_triggered_freeze() {
        let lsm = small_tree(1024);
        let storage = lsm.storage();

        for i in 0..1000 {
            lsm.put(format!("{:05}", i).as_str(), format!("{:05}", i).as_str());
        }

        let imm_count = storage.imm_memtable_count();
        assert!(imm_count >= 1);
        for index in 0..imm_count {
            assert!(storage.imm_memtable_size(index).unwrap() >= 1024);
        }
        assert!(storage.memtable_size() < 1024);

        for i in 0..1000 {
            let key = format!("{:05}", i);
            assert_eq!(lsm.get(&key), Some(Value::from(key.as_str())));
        }
    }

    #[test]
    fn test_set_target_memtable_size() {
        let lsm = LsmTree::open(LsmConfig::default());
        let storage = lsm.storage();
        assert_eq!(storage.target_memtable_size(), 2 * 1024 * 1024);

        lsm.put("aaaa", "bbbb");
        assert_eq!(storage.imm_memtable_count(), 0);

        storage.set_target_memtable_size(8);
        // Threshold is checked on the next write.
        lsm.put("c", "d");
        assert_eq!(storage.imm_memtable_count(), 1);
        assert_eq!(storage.memtable_size(), 0);
    }

    #[test]
    fn test_delete_counts_towards_freeze() {
        let lsm = small_tree(10);
        lsm.delete("0123456789");
        assert_eq!(lsm.storage().imm_memtable_count(), 1);
        assert!(lsm.get("0123456789").is_none());
    }

    #[test]
    fn test_scan_merges_generations() {
        let lsm = LsmTree::open(LsmConfig::default());
        lsm.put("a", "1");
        lsm.put("b", "1");
        lsm.put("c", "1");
        lsm.storage().force_freeze();
        lsm.put("b", "2");
        lsm.delete("c");
        lsm.put("d", "2");
        lsm.storage().force_freeze();
        lsm.put("a", "3");
        lsm.put("e", "3");

        let entries: Vec<_> = lsm
            .scan_live()
            .map(|e| {
                (
                    String::from_utf8(e.key.as_bytes().to_vec()).unwrap(),
                    String::from_utf8(e.value.as_bytes().to_vec()).unwrap(),
                )
            })
            .collect();
        assert_eq!(
            entries,
            vec![
                ("a".to_string(), "3".to_string()),
                ("b".to_string(), "2".to_string()),
                ("d".to_string(), "2".to_string()),
                ("e".to_string(), "3".to_string()),
            ]
        );
    }

    #[test]
    fn test_scan_bounds() {
        let lsm = LsmTree::open(LsmConfig::default());
        for key in ["a", "b", "c", "d", "e"] {
            lsm.put(key, key);
        }
        lsm.storage().force_freeze();
        lsm.delete("c");

        let mut iter = lsm.scan(Bound::Excluded(&b"a"[..]), Bound::Included(&b"d"[..]));
        let mut keys = Vec::new();
        while iter.is_valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        assert_eq!(keys, vec![b"b".to_vec(), b"d".to_vec()]);

        iter.next();
        assert!(!iter.is_valid());
        assert_eq!(iter.key(), b"");

        let iter = lsm.scan(Bound::Included(&b"x"[..]), Bound::Unbounded);
        assert!(!iter.is_valid());
    }

    #[test]
    fn test_scan_empty_storage() {
        let lsm = LsmTree::open(LsmConfig::default());
        assert!(live_keys(&lsm).is_empty());

        lsm.put("a", "1");
        lsm.delete("a");
        assert!(live_keys(&lsm).is_empty());
    }

    #[test]
    fn test_freeze_listener() {
        let lsm = small_tree(16);
        let frozen = Arc::new(Mutex::new(Vec::new()));
        {
            let frozen = Arc::clone(&frozen);
            lsm.storage().on_freeze(move |table| {
                frozen.lock().push((table.id(), table.len()));
            });
        }

        lsm.put("0123456789", "0123456789");
        lsm.storage().force_freeze();

        let seen = frozen.lock().clone();
        assert_eq!(seen, vec![(0, 1), (1, 0)]);
    }

    #[test]
    fn test_stats() {
        let lsm = LsmTree::open(LsmConfig::default());
        lsm.put("a", "1");
        lsm.put("b", "2");
        lsm.storage().force_freeze();
        lsm.put("a", "3");

        assert_eq!(
            lsm.stats(),
            LsmStats {
                memtable_entries: 1,
                memtable_size_bytes: 2,
                imm_memtable_count: 1,
                total_entries: 3,
            }
        );
    }

    #[test]
    fn test_concurrent_writers_with_freezes() {
        let lsm = small_tree(4096);
        let threads = 4;
        let per_thread = 1000;

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let lsm = lsm.clone();
                thread::spawn(move || {
                    for i in 0..per_thread {
                        let key = format!("t{}-{:05}", t, i);
                        lsm.put(key.as_str(), key.as_str());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(lsm.storage().imm_memtable_count() > 0);
        for t in 0..threads {
            for i in 0..per_thread {
                let key = format!("t{}-{:05}", t, i);
                assert_eq!(lsm.get(&key), Some(Value::from(key.as_str())));
            }
        }
        assert_eq!(live_keys(&lsm).len(), threads * per_thread);
        assert_eq!(lsm.stats().total_entries, threads * per_thread);
    }
}
