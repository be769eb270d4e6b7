// Public API
pub mod lsm;

// Internal modules
pub(crate) mod constants;

pub use lsm::{Key, LsmConfig, LsmTree, StorageIterator, Value};
