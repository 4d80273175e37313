//! Persistent ranked indexes ("top K by count") stored as AVL trees over a
//! flat get/put byte store.

pub mod cache;
pub mod config;
pub mod encoding;
pub mod error;
pub mod flock;
pub mod format;
pub mod hasher;
pub mod index;
pub mod store;
pub mod tree;
pub mod wal;

pub use config::{IndexConfig, StoreConfig};
pub use encoding::keycode::{RankKey, TieBreak};
pub use error::{Error, Result};
pub use hasher::Hasher;
pub use index::{RankedIndex, Transition};
pub use store::{ByteStore, CachedStore, LogStore, MemoryStore};
pub use tree::{AvlTree, Order, TreeStats};
