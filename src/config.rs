use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use crate::encoding::keycode::TieBreak;

/// Configuration for a ranked index
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Ordering of entities with equal counts (default: older first)
    pub tie_break: TieBreak,

    /// Entries held by the read-through cache of `RankedIndex::cached` (default: 18000)
    pub cache_capacity: usize,

    /// Overwrite removed node records with an empty tombstone (default: true)
    pub tombstones: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            tie_break: TieBreak::OlderFirst,
            cache_capacity: 18000,
            tombstones: true,
        }
    }
}

impl IndexConfig {
    /// Set the tie-break policy
    pub fn tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }

    /// Set the cache capacity
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Enable or disable tombstones for removed nodes
    pub fn tombstones(mut self, enabled: bool) -> Self {
        self.tombstones = enabled;
        self
    }
}

/// Configuration for the log-backed store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory path for the store
    pub dir: PathBuf,

    /// Sync the log after every put (default: false)
    pub sync_on_write: bool,

    /// Log writer buffer size (default: 64KB)
    pub buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./rankdb"),
            sync_on_write: false,
            buffer_size: 64 * 1024, // 64KB
        }
    }
}

impl StoreConfig {
    /// Create a new config with the given directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Make every put durable before it returns
    pub fn sync_on_write(mut self, enabled: bool) -> Self {
        self.sync_on_write = enabled;
        self
    }

    /// Set log writer buffer size
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }
}
