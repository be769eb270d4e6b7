//! Thread-safe probabilistic skip list.
//!
//! Based on William Pugh, "Skip lists: a probabilistic alternative to
//! balanced trees" (CACM 33(6), 1990).
//!
//! Nodes live in an arena owned by the list and link to each other by arena
//! index, so splicing a node in or out is a handful of index rewrites. Slot 0
//! is the sentinel head; it has a full-height tower and no key.
//!
//! All structural work happens under one `parking_lot::RwLock`: lookups and
//! cursor steps take the read side, `insert`/`erase`/`clear` hold the write
//! side for search and mutation together.
//!
//! Cursors lock per step, not for their whole lifetime. A cursor that is alive
//! while the list is mutated sees an unspecified (but memory-safe)
//! interleaving. Every live node carries a generation stamp, so a cursor
//! whose node has been erased simply becomes invalid instead of wandering into
//! a recycled slot.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::iterator::StorageIterator;
use crate::constants::{MAX_LEVEL, PROMOTION_PROBABILITY};

type NodeId = usize;

const HEAD: NodeId = 0;

/// Generation of the sentinel and of free slots. Live nodes start at 1.
const NO_GENERATION: u64 = 0;

struct Node {
    key: Bytes,
    value: Bytes,
    /// Forward links, one per level the node participates in.
    next: Vec<Option<NodeId>>,
    generation: u64,
}

impl Node {
    fn sentinel() -> Self {
        Self {
            key: Bytes::new(),
            value: Bytes::new(),
            next: vec![None; MAX_LEVEL],
            generation: NO_GENERATION,
        }
    }
}

struct SkipListInner {
    nodes: Vec<Node>,
    free: Vec<NodeId>,
    /// Number of levels in use, always in 1..=MAX_LEVEL.
    level: usize,
    len: usize,
    next_generation: u64,
    rng: StdRng,
}

impl SkipListInner {
    fn new(rng: StdRng) -> Self {
        Self {
            nodes: vec![Node::sentinel()],
            free: Vec::new(),
            level: 1,
            len: 0,
            next_generation: NO_GENERATION + 1,
            rng,
        }
    }

    /// Find the first node with key >= target, recording the rightmost node
    /// visited on each level in `update`.
    fn find_ge(&self, target: &[u8], update: &mut [NodeId; MAX_LEVEL]) -> Option<NodeId> {
        let mut x = HEAD;
        for level in (0..self.level).rev() {
            while let Some(next) = self.nodes[x].next[level] {
                if self.nodes[next].key.as_ref() < target {
                    x = next;
                } else {
                    break;
                }
            }
            update[level] = x;
        }
        self.nodes[x].next[0]
    }

    fn find_exact(&self, target: &[u8], update: &mut [NodeId; MAX_LEVEL]) -> Option<NodeId> {
        self.find_ge(target, update)
            .filter(|&id| self.nodes[id].key.as_ref() == target)
    }

    /// Geometric height: keep promoting while the coin comes up heads.
    fn random_height(&mut self) -> usize {
        let mut height = 1;
        while height < MAX_LEVEL && self.rng.gen_bool(PROMOTION_PROBABILITY) {
            height += 1;
        }
        height
    }

    fn alloc(&mut self, key: Bytes, value: Bytes, height: usize) -> NodeId {
        let generation = self.next_generation;
        self.next_generation += 1;

        let node = Node {
            key,
            value,
            next: vec![None; height],
            generation,
        };
        match self.free.pop() {
            Some(id) => {
                self.nodes[id] = node;
                id
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, id: NodeId) -> Bytes {
        let node = &mut self.nodes[id];
        node.generation = NO_GENERATION;
        node.next = Vec::new();
        node.key = Bytes::new();
        let value = std::mem::take(&mut node.value);
        self.free.push(id);
        value
    }

    fn insert(&mut self, key: Bytes, value: Bytes) -> Option<Bytes> {
        let mut update = [HEAD; MAX_LEVEL];
        if let Some(id) = self.find_exact(&key, &mut update) {
            return Some(std::mem::replace(&mut self.nodes[id].value, value));
        }

        let height = self.random_height();
        if height > self.level {
            // find_ge only filled levels below self.level; the new upper
            // levels hang straight off the sentinel.
            for slot in update.iter_mut().take(height).skip(self.level) {
                *slot = HEAD;
            }
            tracing::trace!(from = self.level, to = height, "skip list level raised");
            self.level = height;
        }

        let id = self.alloc(key, value, height);
        for (level, &pred) in update.iter().enumerate().take(height) {
            self.nodes[id].next[level] = self.nodes[pred].next[level];
            self.nodes[pred].next[level] = Some(id);
        }
        self.len += 1;
        None
    }

    fn erase(&mut self, key: &[u8]) -> Option<Bytes> {
        let mut update = [HEAD; MAX_LEVEL];
        let id = self.find_exact(key, &mut update)?;

        for (level, &pred) in update.iter().enumerate().take(self.level) {
            if self.nodes[pred].next[level] == Some(id) {
                self.nodes[pred].next[level] = self.nodes[id].next[level];
            }
        }
        let value = self.release(id);
        self.len -= 1;

        let before = self.level;
        while self.level > 1 && self.nodes[HEAD].next[self.level - 1].is_none() {
            self.level -= 1;
        }
        if self.level != before {
            tracing::trace!(from = before, to = self.level, "skip list level lowered");
        }
        Some(value)
    }

    fn get(&self, key: &[u8]) -> Option<Bytes> {
        let mut update = [HEAD; MAX_LEVEL];
        self.find_exact(key, &mut update)
            .map(|id| self.nodes[id].value.clone())
    }

    fn clear(&mut self) {
        // Fresh allocations get fresh generations, so truncating cannot make a
        // stale cursor line up with a new node.
        self.nodes.truncate(1);
        self.nodes[HEAD].next.fill(None);
        self.free.clear();
        self.level = 1;
        self.len = 0;
    }
}

/// Thread-safe sorted map from byte strings to byte strings.
pub struct SkipList {
    inner: Arc<RwLock<SkipListInner>>,
}

impl SkipList {
    /// Create an empty skip list seeded from OS entropy.
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Create an empty skip list whose node heights are reproducible.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            inner: Arc::new(RwLock::new(SkipListInner::new(rng))),
        }
    }

    /// Insert or overwrite a key. Returns the value it replaced, if any.
    pub fn insert(&self, key: Bytes, value: Bytes) -> Option<Bytes> {
        self.inner.write().insert(key, value)
    }

    /// Remove a key. Returns the removed value; absent keys are a no-op.
    pub fn erase(&self, key: &[u8]) -> Option<Bytes> {
        self.inner.write().erase(key)
    }

    /// Look a key up.
    pub fn contains(&self, key: &[u8]) -> Option<Bytes> {
        self.inner.read().get(key)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of levels currently in use.
    pub fn level(&self) -> usize {
        self.inner.read().level
    }

    /// Remove every node. The list stays usable afterwards.
    pub fn clear(&self) {
        self.inner.write().clear();
    }

    /// Cursor at the smallest key, invalid if the list is empty.
    pub fn begin(&self) -> SkipListIterator {
        let list = self.inner.read();
        let first = list.nodes[HEAD].next[0];
        SkipListIterator {
            current: Current::load(&list, first),
            list: Arc::clone(&self.inner),
        }
    }

    /// Cursor at the first key >= `start_key`, invalid if there is none.
    pub fn scan(&self, start_key: &[u8]) -> SkipListIterator {
        let list = self.inner.read();
        let mut update = [HEAD; MAX_LEVEL];
        let start = list.find_ge(start_key, &mut update);
        SkipListIterator {
            current: Current::load(&list, start),
            list: Arc::clone(&self.inner),
        }
    }
}

impl Default for SkipList {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the node a cursor sits on.
struct Current {
    id: NodeId,
    generation: u64,
    key: Bytes,
    value: Bytes,
}

impl Current {
    fn load(list: &SkipListInner, id: Option<NodeId>) -> Option<Self> {
        let id = id?;
        let node = &list.nodes[id];
        Some(Self {
            id,
            generation: node.generation,
            key: node.key.clone(),
            value: node.value.clone(),
        })
    }
}

/// Cursor walking level 0 of a [`SkipList`] in key order.
///
/// The cursor keeps the list's storage alive, but it does not hold the lock
/// between steps; see the module docs for what that means under concurrent
/// writes.
pub struct SkipListIterator {
    list: Arc<RwLock<SkipListInner>>,
    current: Option<Current>,
}

impl StorageIterator for SkipListIterator {
    fn key(&self) -> &[u8] {
        self.current.as_ref().map(|c| c.key.as_ref()).unwrap_or(&[])
    }

    fn value(&self) -> &[u8] {
        self.current.as_ref().map(|c| c.value.as_ref()).unwrap_or(&[])
    }

    fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    fn next(&mut self) {
        let Some(current) = self.current.take() else {
            return;
        };
        let list = self.list.read();
        let next = match list.nodes.get(current.id) {
            Some(node) if node.generation == current.generation => node.next[0],
            // Erased (or the list was cleared) since we loaded it.
            _ => None,
        };
        self.current = Current::load(&list, next);
    }
}
