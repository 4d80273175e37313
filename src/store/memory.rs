use crossbeam_skiplist::SkipMap;

use super::ByteStore;
use crate::error::Result;

/// Volatile store over a lock-free skiplist.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: SkipMap<Vec<u8>, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            data: SkipMap::new(),
        }
    }

    /// Number of records, tombstones included.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[async_trait::async_trait]
impl ByteStore for MemoryStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.data.get(key).map(|entry| entry.value().clone()))
    }

    async fn put(&self, key: &[u8], value: Vec<u8>) -> Result<()> {
        self.data.insert(key.to_vec(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_get() {
        let store = MemoryStore::new();
        assert!(store.is_empty());

        store.put(b"key1", b"value1".to_vec()).await.unwrap();
        store.put(b"key2", b"value2".to_vec()).await.unwrap();
        store.put(b"key3", Vec::new()).await.unwrap();

        assert_eq!(store.get(b"key1").await.unwrap(), Some(b"value1".to_vec()));
        assert_eq!(store.get(b"key2").await.unwrap(), Some(b"value2".to_vec()));
        assert_eq!(store.get(b"key3").await.unwrap(), Some(Vec::new()));
        assert_eq!(store.get(b"key4").await.unwrap(), None);
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn test_overwrite() {
        let store = MemoryStore::new();
        store.put(b"key", b"old".to_vec()).await.unwrap();
        store.put(b"key", b"new".to_vec()).await.unwrap();
        assert_eq!(store.get(b"key").await.unwrap(), Some(b"new".to_vec()));
        assert_eq!(store.len(), 1);
    }
}
