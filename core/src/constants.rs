/// Highest tower a skip-list node can have.
pub const MAX_LEVEL: usize = 16;

/// Chance that a node is promoted one level higher.
pub const PROMOTION_PROBABILITY: f64 = 0.5;

/// Default freeze threshold for the mutable memtable (2 MiB).
pub const DEFAULT_TARGET_MEMTABLE_SIZE: usize = 2 * 1024 * 1024;
