//! Ranked indexes kept in step with externally tracked counters.
//!
//! A counter change for an entity becomes a delete of its old rank key
//! followed by an insert at the new one. [`RankedIndex::update_tree`] trusts
//! the caller for the old count; [`RankedIndex::reindex`] looks it up in a
//! per-tree reverse index instead.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::IndexConfig;
use crate::encoding::keycode::RankKey;
use crate::encoding::Key;
use crate::error::{Error, Result};
use crate::store::{ByteStore, CachedStore};
use crate::tree::{AvlTree, TreeStats};

pub const CHANNELS_BY_USERS: &str = "channels_by_users";
pub const CHANNELS_BY_ACTIVE_USERS: &str = "channels_by_active_users";
pub const USERS_BY_CHANNELS: &str = "users_by_channels";
pub const CHANNELS_BY_MESSAGES: &str = "channels_by_messages";

/// What an update did to the entity's presence in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Inserted with no previous node removed.
    Indexed,
    /// Previous node removed and a new one inserted.
    Reindexed,
    /// Previous node removed, nothing inserted.
    Unindexed,
    /// Nothing removed or inserted.
    Unchanged,
}

impl Transition {
    fn of(deleted: bool, inserted: bool) -> Self {
        match (deleted, inserted) {
            (false, true) => Transition::Indexed,
            (true, true) => Transition::Reindexed,
            (true, false) => Transition::Unindexed,
            (false, false) => Transition::Unchanged,
        }
    }
}

/// Named ranked trees sharing one store. Every operation holds the writer
/// lock, so within a process all calls on one index are serialized and a
/// read never observes a half-flushed mutation.
pub struct RankedIndex<S> {
    store: Arc<S>,
    config: IndexConfig,
    writer: Mutex<()>,
}

impl<S: ByteStore> RankedIndex<S> {
    pub fn new(store: S, config: IndexConfig) -> Self {
        Self::with_shared(Arc::new(store), config)
    }

    pub fn with_shared(store: Arc<S>, config: IndexConfig) -> Self {
        Self {
            store,
            config,
            writer: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Handle to one named tree. Bypasses the writer lock; meant for
    /// inspection and tooling.
    pub fn tree(&self, name: &str) -> Result<AvlTree<Arc<S>>> {
        let tree = AvlTree::new(self.store.clone(), name)?;
        Ok(if self.config.tombstones {
            tree
        } else {
            tree.without_tombstones()
        })
    }

    pub fn rank_key(&self, count: i64, tie_breaker: u64) -> RankKey {
        RankKey::new(count, tie_breaker, self.config.tie_break)
    }

    /// Moves `entity` from its old rank to `new_count`.
    ///
    /// The node at `(old_count, tie_breaker)` is deleted first; a missing node
    /// is tolerated. Nothing is inserted when `remove` is set or `new_count`
    /// is not positive. An insert that lands on an occupied rank key means
    /// two entities share a tie-breaker and fails with [`Error::Occupied`].
    pub async fn update_tree(
        &self,
        tree: &str,
        entity: &str,
        new_count: i64,
        old_count: Option<i64>,
        tie_breaker: u64,
        remove: bool,
    ) -> Result<Transition> {
        let tree = self.tree(tree)?;
        let _writer = self.writer.lock().await;

        let mut deleted = false;
        if let Some(old_count) = old_count {
            let old = self.rank_key(old_count, tie_breaker);
            deleted = tree.delete(&old).await?;
            if !deleted {
                tracing::debug!(tree = tree.name(), entity, key = %old, "Old rank key not found");
            }
        }

        let mut inserted = false;
        if !remove && new_count > 0 {
            let new = self.rank_key(new_count, tie_breaker);
            insert(&tree, new, entity).await?;
            inserted = true;
        }

        let transition = Transition::of(deleted, inserted);
        tracing::debug!(
            tree = tree.name(),
            entity,
            new_count,
            ?old_count,
            ?transition,
            "Updated tree"
        );
        Ok(transition)
    }

    /// Payloads of the `n` highest-ranked entities, highest first.
    pub async fn top_k(&self, tree: &str, n: usize) -> Result<Vec<String>> {
        let tree = self.tree(tree)?;
        let _writer = self.writer.lock().await;
        tree.top_k(n).await
    }

    /// Rank key recorded for `entity` by [`RankedIndex::reindex`].
    pub async fn current_rank(&self, tree: &str, entity: &str) -> Result<Option<RankKey>> {
        let tree = self.tree(tree)?;
        let _writer = self.writer.lock().await;
        current_rank(&tree, entity).await
    }

    /// Like [`RankedIndex::update_tree`], but the old rank key comes from the
    /// reverse index instead of the caller.
    pub async fn reindex(
        &self,
        tree: &str,
        entity: &str,
        new_count: i64,
        tie_breaker: u64,
    ) -> Result<Transition> {
        let tree = self.tree(tree)?;
        let _writer = self.writer.lock().await;

        let current = current_rank(&tree, entity).await?;
        if new_count <= 0 {
            return unindex(&tree, entity, current).await;
        }

        let new = self.rank_key(new_count, tie_breaker);
        if current == Some(new) {
            return Ok(Transition::Unchanged);
        }

        let deleted = match current {
            Some(old) => delete_tracked(&tree, entity, &old).await?,
            None => false,
        };
        insert(&tree, new, entity).await?;
        tree.store()
            .put(&tree.namespace().entity_key(entity), new.encode())
            .await?;

        let transition = Transition::of(deleted, true);
        tracing::debug!(tree = tree.name(), entity, new_count, ?transition, "Reindexed entity");
        Ok(transition)
    }

    /// Removes `entity` from the tree using its recorded rank key.
    pub async fn unindex(&self, tree: &str, entity: &str) -> Result<Transition> {
        let tree = self.tree(tree)?;
        let _writer = self.writer.lock().await;
        let current = current_rank(&tree, entity).await?;
        unindex(&tree, entity, current).await
    }

    pub async fn validate(&self, tree: &str) -> Result<TreeStats> {
        let tree = self.tree(tree)?;
        let _writer = self.writer.lock().await;
        tree.validate().await
    }

    pub async fn sync(&self) -> Result<()> {
        self.store.sync().await
    }
}

impl<S: ByteStore> RankedIndex<CachedStore<S>> {
    /// Index over `store` behind a cache of `config.cache_capacity` records.
    pub fn cached(store: S, config: IndexConfig) -> Self {
        let capacity = config.cache_capacity;
        Self::new(CachedStore::new(store, capacity), config)
    }
}

async fn insert<S: ByteStore>(tree: &AvlTree<S>, key: RankKey, entity: &str) -> Result<()> {
    if tree.insert(key, entity).await? {
        Ok(())
    } else {
        Err(Error::Occupied {
            key: tree.namespace().node_key(&key),
        })
    }
}

async fn current_rank<S: ByteStore>(tree: &AvlTree<S>, entity: &str) -> Result<Option<RankKey>> {
    let key = tree.namespace().entity_key(entity);
    match tree.store().get(&key).await? {
        Some(value) if !value.is_empty() => RankKey::decode(&value).map(Some).map_err(|e| {
            Error::MalformedRecord {
                key,
                reason: e.to_string(),
            }
        }),
        _ => Ok(None),
    }
}

async fn delete_tracked<S: ByteStore>(
    tree: &AvlTree<S>,
    entity: &str,
    key: &RankKey,
) -> Result<bool> {
    let deleted = tree.delete(key).await?;
    if !deleted {
        tracing::warn!(tree = tree.name(), entity, %key, "Reverse index points at a missing node");
    }
    Ok(deleted)
}

async fn unindex<S: ByteStore>(
    tree: &AvlTree<S>,
    entity: &str,
    current: Option<RankKey>,
) -> Result<Transition> {
    let Some(old) = current else {
        return Ok(Transition::Unchanged);
    };
    let deleted = delete_tracked(tree, entity, &old).await?;
    tree.store()
        .put(&tree.namespace().entity_key(entity), Vec::new())
        .await?;
    Ok(Transition::of(deleted, false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::encoding::keycode::TieBreak;
    use crate::store::{LogStore, MemoryStore};
    use rand::seq::SliceRandom;
    use rand::Rng;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn index() -> RankedIndex<MemoryStore> {
        RankedIndex::new(MemoryStore::new(), IndexConfig::default())
    }

    /// Rejects every put.
    #[derive(Default)]
    struct ReadOnlyStore {
        inner: MemoryStore,
    }

    #[async_trait::async_trait]
    impl ByteStore for ReadOnlyStore {
        async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
            self.inner.get(key).await
        }

        async fn put(&self, _key: &[u8], _value: Vec<u8>) -> Result<()> {
            Err(Error::Store("read-only".to_string()))
        }
    }

    #[tokio::test]
    async fn test_rank_migration() {
        let index = index();
        let t = CHANNELS_BY_USERS;

        let transition = index.update_tree(t, "E", 1, None, 5, false).await.unwrap();
        assert_eq!(transition, Transition::Indexed);
        assert_eq!(index.top_k(t, 1).await.unwrap(), vec!["E"]);

        let transition = index.update_tree(t, "E", 3, Some(1), 5, false).await.unwrap();
        assert_eq!(transition, Transition::Reindexed);
        index.update_tree(t, "F", 2, None, 6, false).await.unwrap();

        assert_eq!(index.top_k(t, 2).await.unwrap(), vec!["E", "F"]);
        assert_eq!(index.validate(t).await.unwrap().nodes, 2);
    }

    #[tokio::test]
    async fn test_double_remove_is_safe() {
        let index = index();
        let t = USERS_BY_CHANNELS;
        index.update_tree(t, "E", 1, None, 5, false).await.unwrap();

        let first = index.update_tree(t, "E", 0, Some(1), 5, true).await.unwrap();
        let second = index.update_tree(t, "E", 0, Some(1), 5, true).await.unwrap();
        assert_eq!(first, Transition::Unindexed);
        assert_eq!(second, Transition::Unchanged);
        assert!(index.top_k(t, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_positive_count_is_not_indexed() {
        let index = index();
        let t = CHANNELS_BY_MESSAGES;

        let transition = index.update_tree(t, "E", 0, None, 1, false).await.unwrap();
        assert_eq!(transition, Transition::Unchanged);

        index.update_tree(t, "E", 1, None, 1, false).await.unwrap();
        let transition = index.update_tree(t, "E", 0, Some(1), 1, false).await.unwrap();
        assert_eq!(transition, Transition::Unindexed);
        assert!(index.tree(t).unwrap().is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_shared_tie_breaker_is_occupied() {
        let index = index();
        let t = CHANNELS_BY_USERS;
        index.update_tree(t, "E", 1, None, 5, false).await.unwrap();

        let err = index.update_tree(t, "F", 1, None, 5, false).await.unwrap_err();
        assert!(matches!(err, Error::Occupied { .. }));
        assert!(!err.is_fatal());
        assert_eq!(index.top_k(t, 10).await.unwrap(), vec!["E"]);
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let index = RankedIndex::new(ReadOnlyStore::default(), IndexConfig::default());
        let err = index
            .update_tree(CHANNELS_BY_USERS, "E", 1, None, 5, false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Store(_)));
    }

    #[tokio::test]
    async fn test_invalid_tree_name() {
        let index = index();
        let err = index.top_k("a/b", 1).await.unwrap_err();
        assert!(matches!(err, Error::InvalidTreeName(_)));
    }

    #[tokio::test]
    async fn test_trees_are_independent() {
        let index = index();
        index.update_tree(CHANNELS_BY_USERS, "#a", 3, None, 1, false).await.unwrap();
        index.update_tree(CHANNELS_BY_ACTIVE_USERS, "#a", 1, None, 1, false).await.unwrap();
        index.update_tree(CHANNELS_BY_ACTIVE_USERS, "#b", 2, None, 2, false).await.unwrap();

        assert_eq!(index.top_k(CHANNELS_BY_USERS, 10).await.unwrap(), vec!["#a"]);
        assert_eq!(
            index.top_k(CHANNELS_BY_ACTIVE_USERS, 10).await.unwrap(),
            vec!["#b", "#a"]
        );
    }

    #[tokio::test]
    async fn test_equal_counts_older_first() {
        let index = index();
        let t = CHANNELS_BY_USERS;
        for (tie, channel) in ["#TakeCare", "#TakeCare2", "#Other"].iter().enumerate() {
            index.update_tree(t, channel, 1, None, tie as u64, false).await.unwrap();
        }
        index.update_tree(t, "#Other", 2, Some(1), 2, false).await.unwrap();

        assert_eq!(
            index.top_k(t, 10).await.unwrap(),
            vec!["#Other", "#TakeCare", "#TakeCare2"]
        );

        let newer = RankedIndex::new(
            MemoryStore::new(),
            IndexConfig::default().tie_break(TieBreak::NewerFirst),
        );
        newer.update_tree(t, "#TakeCare", 1, None, 0, false).await.unwrap();
        newer.update_tree(t, "#TakeCare2", 1, None, 1, false).await.unwrap();
        assert_eq!(newer.top_k(t, 10).await.unwrap(), vec!["#TakeCare2", "#TakeCare"]);
    }

    #[tokio::test]
    async fn test_tracked_updates() {
        let index = index();
        let t = USERS_BY_CHANNELS;

        assert_eq!(index.reindex(t, "alice", 3, 1).await.unwrap(), Transition::Indexed);
        assert_eq!(index.reindex(t, "bob", 4, 2).await.unwrap(), Transition::Indexed);
        assert_eq!(index.reindex(t, "alice", 5, 1).await.unwrap(), Transition::Reindexed);
        assert_eq!(index.reindex(t, "alice", 5, 1).await.unwrap(), Transition::Unchanged);

        let rank = index.current_rank(t, "alice").await.unwrap().unwrap();
        assert_eq!(rank.count(), 5);
        assert_eq!(index.top_k(t, 10).await.unwrap(), vec!["alice", "bob"]);

        assert_eq!(index.unindex(t, "alice").await.unwrap(), Transition::Unindexed);
        assert_eq!(index.unindex(t, "alice").await.unwrap(), Transition::Unchanged);
        assert_eq!(index.current_rank(t, "alice").await.unwrap(), None);
        assert_eq!(index.reindex(t, "bob", 0, 2).await.unwrap(), Transition::Unindexed);

        assert_eq!(index.validate(t).await.unwrap().nodes, 0);
    }

    #[tokio::test]
    async fn test_matches_sorted_model() {
        let index = index();
        let t = CHANNELS_BY_MESSAGES;
        let mut rng = rand::thread_rng();
        let mut counts: HashMap<u64, i64> = HashMap::new();

        for _ in 0..400 {
            let entity = rng.gen_range(0..40u64);
            let old = counts.get(&entity).copied();
            let new = (old.unwrap_or(0) + rng.gen_range(-2..=3)).max(0);
            index
                .update_tree(t, &entity.to_string(), new, old, entity, false)
                .await
                .unwrap();
            if new > 0 {
                counts.insert(entity, new);
            } else {
                counts.remove(&entity);
            }
        }

        let mut expected: Vec<(i64, u64)> = counts.iter().map(|(e, c)| (*c, *e)).collect();
        // Count descending, then older (smaller tie-breaker) first.
        expected.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        let expected: Vec<String> = expected.iter().map(|(_, e)| e.to_string()).collect();

        assert_eq!(index.top_k(t, 10).await.unwrap(), expected[..expected.len().min(10)]);
        assert_eq!(index.top_k(t, 1000).await.unwrap(), expected);
        assert_eq!(index.validate(t).await.unwrap().nodes, counts.len());
    }

    #[tokio::test]
    async fn test_cached_index() {
        let config = IndexConfig::default().cache_capacity(64);
        let index = RankedIndex::cached(MemoryStore::new(), config);
        let t = CHANNELS_BY_USERS;

        let mut entities: Vec<u64> = (1..=50).collect();
        entities.shuffle(&mut rand::thread_rng());
        for e in &entities {
            index.update_tree(t, &e.to_string(), *e as i64, None, *e, false).await.unwrap();
        }

        assert_eq!(index.top_k(t, 3).await.unwrap(), vec!["50", "49", "48"]);
        let (hits, _) = index.store().stats().unwrap();
        assert!(hits > 0);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempdir().unwrap();
        let t = CHANNELS_BY_USERS;

        {
            let index = RankedIndex::new(
                LogStore::open_with_config(StoreConfig::new(dir.path())).unwrap(),
                IndexConfig::default(),
            );
            index.update_tree(t, "#a", 2, None, 1, false).await.unwrap();
            index.update_tree(t, "#b", 1, None, 2, false).await.unwrap();
            index.update_tree(t, "#b", 3, Some(1), 2, false).await.unwrap();
            index.sync().await.unwrap();
        }

        let index = RankedIndex::new(LogStore::open(dir.path()).unwrap(), IndexConfig::default());
        assert_eq!(index.top_k(t, 10).await.unwrap(), vec!["#b", "#a"]);
        assert_eq!(index.validate(t).await.unwrap().nodes, 2);
    }
}
