use std::sync::Mutex;

use super::ByteStore;
use crate::cache::Cache;
use crate::error::Result;

/// Read-through, write-through cache in front of another store. Absent keys
/// are cached too, so repeated lookups of a missing root pointer stay local.
pub struct CachedStore<S> {
    inner: S,
    state: Mutex<State>,
}

struct State {
    cache: Cache<Vec<u8>, Option<Vec<u8>>>,
    /// Bumped by every put; a read that raced a put does not fill the cache.
    generation: u64,
}

impl<S: ByteStore> CachedStore<S> {
    pub fn new(inner: S, capacity: usize) -> Self {
        Self {
            inner,
            state: Mutex::new(State {
                cache: Cache::new(capacity, None),
                generation: 0,
            }),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// `(hits, misses)` of the cache.
    pub fn stats(&self) -> Result<(usize, usize)> {
        Ok(self.state.lock()?.cache.stats())
    }
}

#[async_trait::async_trait]
impl<S: ByteStore> ByteStore for CachedStore<S> {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let generation = {
            let state = self.state.lock()?;
            if let Some(value) = state.cache.get(key) {
                return Ok(value.clone());
            }
            state.generation
        };

        let value = self.inner.get(key).await?;

        let mut state = self.state.lock()?;
        if state.generation == generation {
            state.cache.insert(key.to_vec(), value.clone());
        }
        Ok(value)
    }

    async fn put(&self, key: &[u8], value: Vec<u8>) -> Result<()> {
        self.inner.put(key, value.clone()).await?;

        let mut state = self.state.lock()?;
        state.cache.insert(key.to_vec(), Some(value));
        state.generation += 1;
        Ok(())
    }

    async fn sync(&self) -> Result<()> {
        self.inner.sync().await
    }
}
