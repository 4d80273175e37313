use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crossbeam_skiplist::SkipMap;
use tokio::task::JoinError;

use super::ByteStore;
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::flock::FileLock;
use crate::wal::Wal;

const LOCK_FILE: &str = "rankdb.lock";
const LOG_FILE: &str = "rankdb.log";

/// Durable store: every put is appended to a single log file and applied to
/// an in-memory skiplist that serves reads. The log is replayed on open and
/// never compacted, so it grows with every put.
///
/// A put that fails leaves its value out of the skiplist. The log is then
/// rolled back to its last sync and every later put or sync fails with
/// [`Error::LogFailed`] until the store is reopened.
pub struct LogStore {
    data: Arc<SkipMap<Vec<u8>, Vec<u8>>>,
    wal: Arc<Mutex<Wal>>,
    config: StoreConfig,
    _lock: FileLock,
}

impl LogStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_config(StoreConfig::new(dir))
    }

    pub fn open_with_config(config: StoreConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.dir)?;
        let lock = FileLock::lock(config.dir.join(LOCK_FILE))?;

        let data = SkipMap::new();
        let (wal, recovery) = Wal::open(config.dir.join(LOG_FILE), config.buffer_size, |k, v| {
            data.insert(k, v);
        })?;

        tracing::info!(
            dir = %config.dir.display(),
            replayed = recovery.replayed,
            keys = data.len(),
            truncated = recovery.truncated,
            "Opened log store"
        );

        Ok(Self {
            data: Arc::new(data),
            wal: Arc::new(Mutex::new(wal)),
            config,
            _lock: lock,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    /// Number of distinct keys, tombstones included.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[async_trait::async_trait]
impl ByteStore for LogStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.data.get(key).map(|entry| entry.value().clone()))
    }

    async fn put(&self, key: &[u8], value: Vec<u8>) -> Result<()> {
        let data = self.data.clone();
        let wal = self.wal.clone();
        let sync = self.config.sync_on_write;
        let key = key.to_vec();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut wal = wal.lock()?;
            wal.append(&key, &value)?;
            if sync {
                wal.sync()?;
            }
            // Applied under the log lock so reads never run ahead of the log order.
            data.insert(key, value);
            Ok(())
        })
        .await
        .map_err(joined)?
    }

    async fn sync(&self) -> Result<()> {
        let wal = self.wal.clone();
        tokio::task::spawn_blocking(move || wal.lock()?.sync())
            .await
            .map_err(joined)?
    }
}

fn joined(err: JoinError) -> Error {
    Error::Store(format!("log task failed: {err}"))
}
