pub mod cached;
pub mod log;
pub mod memory;

use std::sync::Arc;

use crate::error::Result;

pub use cached::CachedStore;
pub use log::LogStore;
pub use memory::MemoryStore;

/// Flat byte-addressed key-value store: single-key get and put, no ordering,
/// no deletes, no transactions.
///
/// An empty value is how callers in this crate spell "removed".
#[async_trait::async_trait]
pub trait ByteStore: Send + Sync {
    /// Retrieves the value for a given key.
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Inserts or overwrites a key-value pair.
    async fn put(&self, key: &[u8], value: Vec<u8>) -> Result<()>;

    /// Makes every completed put durable. Stores without durability succeed
    /// immediately.
    async fn sync(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait::async_trait]
impl<T: ByteStore + ?Sized> ByteStore for Arc<T> {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        (**self).get(key).await
    }

    async fn put(&self, key: &[u8], value: Vec<u8>) -> Result<()> {
        (**self).put(key, value).await
    }

    async fn sync(&self) -> Result<()> {
        (**self).sync().await
    }
}
