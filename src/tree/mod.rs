//! Persistent AVL tree addressed entirely through a [`ByteStore`].
//!
//! Every node lives in its own record keyed by its rank key; child pointers
//! are rank keys too. Nothing survives in memory between calls: each mutation
//! loads the nodes it touches into a [`Session`], rebalances them there and
//! writes the changed records back.

pub mod namespace;
pub mod node;
pub mod topk;
pub mod validate;

use std::cmp::{max, Ordering};
use std::collections::{BTreeSet, HashMap};

use crate::encoding::keycode::RankKey;
use crate::encoding::Key;
use crate::error::{Error, Result};
use crate::format::{Formatter, Records};
use crate::store::ByteStore;

pub use namespace::{Namespace, RecordKey};
pub use node::{Dir, Node, NodeRef};
pub use topk::{Order, Walk};
pub use validate::TreeStats;

/// Handle to one named AVL tree in a store.
#[derive(Debug, Clone)]
pub struct AvlTree<S> {
    store: S,
    ns: Namespace,
    tombstones: bool,
}

impl<S: ByteStore> AvlTree<S> {
    pub fn new(store: S, name: &str) -> Result<Self> {
        Ok(Self {
            store,
            ns: Namespace::new(name)?,
            tombstones: true,
        })
    }

    /// Leave removed records stale instead of overwriting them.
    pub fn without_tombstones(mut self) -> Self {
        self.tombstones = false;
        self
    }

    pub fn name(&self) -> &str {
        self.ns.name()
    }

    pub(crate) fn namespace(&self) -> &Namespace {
        &self.ns
    }

    pub(crate) fn store(&self) -> &S {
        &self.store
    }

    /// Rank key of the current root, `None` for an empty tree.
    pub async fn root(&self) -> Result<NodeRef> {
        let key = self.ns.root_key();
        match self.store.get(&key).await? {
            None => Ok(None),
            Some(value) if value.is_empty() => Ok(None),
            Some(value) => RankKey::decode(&value)
                .map(Some)
                .map_err(|e| malformed(key, e)),
        }
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.root().await?.is_none())
    }

    /// Loads a node that some pointer refers to; a missing record is a
    /// dangling reference.
    pub(crate) async fn load(&self, key: &RankKey) -> Result<Node> {
        let record_key = self.ns.node_key(key);
        match self.store.get(&record_key).await? {
            Some(record) if !record.is_empty() => {
                Node::decode(&record).map_err(|e| malformed(record_key, e))
            }
            _ => Err(Error::DanglingReference { key: record_key }),
        }
    }

    /// Point lookup by descent from the root.
    pub async fn search(&self, key: &RankKey) -> Result<Option<String>> {
        let mut cursor = self.root().await?;
        while let Some(at) = cursor {
            let node = self.load(&at).await?;
            cursor = match key.cmp(&at) {
                Ordering::Equal => return Ok(Some(node.payload)),
                Ordering::Less => node.left,
                Ordering::Greater => node.right,
            };
        }
        Ok(None)
    }

    /// Inserts `payload` at `key`. Returns `false` without writing anything
    /// when the key is already occupied.
    pub async fn insert(&self, key: RankKey, payload: &str) -> Result<bool> {
        let root = self.root().await?;
        let mut session = Session::new(self);
        let mut path = Vec::new();

        let mut cursor = root;
        while let Some(at) = cursor {
            let node = session.load(at).await?;
            let dir = match key.cmp(&at) {
                Ordering::Equal => return Ok(false),
                Ordering::Less => Dir::Left,
                Ordering::Greater => Dir::Right,
            };
            cursor = node.child(dir);
            path.push((at, dir));
        }

        session.create(key, Node::leaf(payload));
        let new_root = session.rebuild(path, Some(key)).await?;
        session.flush(root, new_root).await?;
        Ok(true)
    }

    /// Removes the node at `key`. Returns `false` when no such node exists.
    pub async fn delete(&self, key: &RankKey) -> Result<bool> {
        let root = self.root().await?;
        let mut session = Session::new(self);
        let mut path = Vec::new();

        let mut cursor = root;
        let target = loop {
            let Some(at) = cursor else {
                return Ok(false);
            };
            let node = session.load(at).await?;
            let dir = match key.cmp(&at) {
                Ordering::Equal => break node.clone(),
                Ordering::Less => Dir::Left,
                Ordering::Greater => Dir::Right,
            };
            cursor = node.child(dir);
            path.push((at, dir));
        };

        let replacement = match (target.left, target.right) {
            (None, None) => None,
            (Some(only), None) | (None, Some(only)) => Some(only),
            (Some(left), Some(right)) => {
                // The in-order successor moves into the removed node's slot.
                let mut chain = Vec::new();
                let mut successor = right;
                while let Some(next) = session.load(successor).await?.left {
                    chain.push(successor);
                    successor = next;
                }

                if chain.is_empty() {
                    session.set_child(successor, Dir::Left, Some(left)).await?;
                    Some(session.rebalance(successor).await?)
                } else {
                    let orphan = session.load(successor).await?.right;
                    session.set_child(successor, Dir::Left, Some(left)).await?;
                    session.set_child(successor, Dir::Right, Some(right)).await?;
                    path.push((successor, Dir::Right));
                    path.extend(chain.into_iter().map(|at| (at, Dir::Left)));
                    orphan
                }
            }
        };

        session.remove(*key);
        let new_root = session.rebuild(path, replacement).await?;
        session.flush(root, new_root).await?;
        Ok(true)
    }
}

/// Nodes loaded and modified by a single mutation.
struct Session<'t, S> {
    tree: &'t AvlTree<S>,
    nodes: HashMap<RankKey, Node>,
    dirty: BTreeSet<RankKey>,
    removed: Vec<RankKey>,
    rotations: usize,
}

impl<'t, S: ByteStore> Session<'t, S> {
    fn new(tree: &'t AvlTree<S>) -> Self {
        Self {
            tree,
            nodes: HashMap::new(),
            dirty: BTreeSet::new(),
            removed: Vec::new(),
            rotations: 0,
        }
    }

    async fn load(&mut self, key: RankKey) -> Result<&mut Node> {
        let node = match self.nodes.remove(&key) {
            Some(node) => node,
            None => self.tree.load(&key).await?,
        };
        Ok(self.nodes.entry(key).or_insert(node))
    }

    fn create(&mut self, key: RankKey, node: Node) {
        self.nodes.insert(key, node);
        self.dirty.insert(key);
    }

    fn remove(&mut self, key: RankKey) {
        self.nodes.remove(&key);
        self.dirty.remove(&key);
        self.removed.push(key);
    }

    async fn set_child(&mut self, parent: RankKey, dir: Dir, child: NodeRef) -> Result<()> {
        if self.load(parent).await?.set_child(dir, child) {
            self.dirty.insert(parent);
        }
        Ok(())
    }

    async fn height(&mut self, node: NodeRef) -> Result<u32> {
        match node {
            None => Ok(0),
            Some(key) => Ok(self.load(key).await?.height),
        }
    }

    /// Left height minus right height.
    async fn balance(&mut self, key: RankKey) -> Result<i64> {
        let (left, right) = {
            let node = self.load(key).await?;
            (node.left, node.right)
        };
        let left = self.height(left).await?;
        let right = self.height(right).await?;
        Ok(i64::from(left) - i64::from(right))
    }

    async fn update_height(&mut self, key: RankKey) -> Result<()> {
        let (left, right) = {
            let node = self.load(key).await?;
            (node.left, node.right)
        };
        let height = 1 + max(self.height(left).await?, self.height(right).await?);
        let node = self.load(key).await?;
        if node.height != height {
            node.height = height;
            self.dirty.insert(key);
        }
        Ok(())
    }

    async fn rotate_right(&mut self, key: RankKey) -> Result<RankKey> {
        let pivot = self.load(key).await?.left.ok_or_else(|| {
            Error::Integrity(format!("right rotation at {key} without a left child"))
        })?;
        let inner = self.load(pivot).await?.right;

        self.set_child(key, Dir::Left, inner).await?;
        self.set_child(pivot, Dir::Right, Some(key)).await?;
        self.update_height(key).await?;
        self.update_height(pivot).await?;

        self.rotations += 1;
        tracing::trace!(tree = self.tree.name(), at = %key, pivot = %pivot, "Rotate right");
        Ok(pivot)
    }

    async fn rotate_left(&mut self, key: RankKey) -> Result<RankKey> {
        let pivot = self.load(key).await?.right.ok_or_else(|| {
            Error::Integrity(format!("left rotation at {key} without a right child"))
        })?;
        let inner = self.load(pivot).await?.left;

        self.set_child(key, Dir::Right, inner).await?;
        self.set_child(pivot, Dir::Left, Some(key)).await?;
        self.update_height(key).await?;
        self.update_height(pivot).await?;

        self.rotations += 1;
        tracing::trace!(tree = self.tree.name(), at = %key, pivot = %pivot, "Rotate left");
        Ok(pivot)
    }

    /// Restores the AVL property at `key`, returning the subtree's new root.
    async fn rebalance(&mut self, key: RankKey) -> Result<RankKey> {
        self.update_height(key).await?;
        let balance = self.balance(key).await?;

        if balance > 1 {
            let left = self.load(key).await?.left.ok_or_else(|| {
                Error::Integrity(format!("left-heavy node {key} has no left child"))
            })?;
            if self.balance(left).await? < 0 {
                let left = self.rotate_left(left).await?;
                self.set_child(key, Dir::Left, Some(left)).await?;
            }
            return self.rotate_right(key).await;
        }

        if balance < -1 {
            let right = self.load(key).await?.right.ok_or_else(|| {
                Error::Integrity(format!("right-heavy node {key} has no right child"))
            })?;
            if self.balance(right).await? > 0 {
                let right = self.rotate_right(right).await?;
                self.set_child(key, Dir::Right, Some(right)).await?;
            }
            return self.rotate_left(key).await;
        }

        Ok(key)
    }

    /// Hangs `child` under the deepest path entry and rebalances every
    /// ancestor bottom-up. Returns the new root of the whole tree.
    async fn rebuild(&mut self, path: Vec<(RankKey, Dir)>, mut child: NodeRef) -> Result<NodeRef> {
        for (parent, dir) in path.into_iter().rev() {
            self.set_child(parent, dir, child).await?;
            child = Some(self.rebalance(parent).await?);
        }
        Ok(child)
    }

    /// Writes dirty nodes, then the root pointer if it moved, then tombstones.
    /// Node records are overwritten in place, so a failure part way through
    /// can leave a shape that mixes old and new links or has lost nodes.
    async fn flush(self, old_root: NodeRef, new_root: NodeRef) -> Result<()> {
        let tree = self.tree;

        for key in &self.dirty {
            let Some(node) = self.nodes.get(key) else {
                continue;
            };
            let record_key = tree.ns.node_key(key);
            let record = node.encode()?;
            tracing::trace!(record = %Records::key_value(&record_key, &record), "Write node");
            tree.store.put(&record_key, record).await?;
        }

        if old_root != new_root {
            let value = new_root.map(|key| key.encode()).unwrap_or_default();
            tree.store.put(&tree.ns.root_key(), value).await?;
        }

        if tree.tombstones {
            for key in &self.removed {
                tree.store.put(&tree.ns.node_key(key), Vec::new()).await?;
            }
        }

        tracing::debug!(
            tree = tree.name(),
            written = self.dirty.len(),
            removed = self.removed.len(),
            rotations = self.rotations,
            root_changed = old_root != new_root,
            "Flushed tree session"
        );
        Ok(())
    }
}

fn malformed(key: Vec<u8>, err: Error) -> Error {
    Error::MalformedRecord {
        key,
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::keycode::TieBreak;
    use crate::store::MemoryStore;
    use rand::seq::SliceRandom;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;

    fn key(count: i64) -> RankKey {
        RankKey::new(count, 2019, TieBreak::OlderFirst)
    }

    fn new_tree() -> AvlTree<Arc<MemoryStore>> {
        AvlTree::new(Arc::new(MemoryStore::new()), "test").unwrap()
    }

    /// Accepts `budget` more puts, then fails every put.
    struct BudgetStore {
        inner: MemoryStore,
        budget: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ByteStore for BudgetStore {
        async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
            self.inner.get(key).await
        }

        async fn put(&self, key: &[u8], value: Vec<u8>) -> Result<()> {
            let spent = self
                .budget
                .fetch_update(AtomicOrdering::SeqCst, AtomicOrdering::SeqCst, |left| {
                    left.checked_sub(1)
                });
            if spent.is_err() {
                return Err(Error::Store("out of budget".to_string()));
            }
            self.inner.put(key, value).await
        }
    }

    #[tokio::test]
    async fn test_insert_one_and_read_it() {
        let tree = new_tree();
        assert!(tree.is_empty().await.unwrap());

        assert!(tree.insert(key(1_000_000), "").await.unwrap());
        assert_eq!(tree.search(&key(1_000_000)).await.unwrap(), Some("".to_string()));
        assert!(!tree.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_insert_many_and_read_them() {
        let tree = new_tree();
        for i in 0..=100 {
            tree.insert(key(i), &i.to_string()).await.unwrap();
        }
        for i in 0..=100 {
            assert_eq!(tree.search(&key(i)).await.unwrap(), Some(i.to_string()));
        }
        assert_eq!(tree.search(&key(101)).await.unwrap(), None);

        let stats = tree.validate().await.unwrap();
        assert_eq!(stats.nodes, 101);
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_noop() {
        let store = Arc::new(MemoryStore::new());
        let tree = AvlTree::new(store.clone(), "test").unwrap();
        assert!(tree.insert(key(5), "first").await.unwrap());
        let records = store.len();

        assert!(!tree.insert(key(5), "second").await.unwrap());
        assert_eq!(store.len(), records);
        assert_eq!(tree.search(&key(5)).await.unwrap(), Some("first".to_string()));
    }

    #[tokio::test]
    async fn test_insert_one_and_delete_it() {
        let tree = new_tree();
        tree.insert(key(1_000_000), "").await.unwrap();
        assert!(tree.delete(&key(1_000_000)).await.unwrap());
        assert_eq!(tree.search(&key(1_000_000)).await.unwrap(), None);
        assert!(tree.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_missing_key_is_not_found() {
        let tree = new_tree();
        assert!(!tree.delete(&key(1)).await.unwrap());

        tree.insert(key(2), "two").await.unwrap();
        assert!(!tree.delete(&key(1)).await.unwrap());
        assert_eq!(tree.search(&key(2)).await.unwrap(), Some("two".to_string()));
    }

    #[tokio::test]
    async fn test_delete_node_with_two_children() {
        let tree = new_tree();
        for i in [50, 30, 70, 20, 40, 60, 80, 65] {
            tree.insert(key(i), &i.to_string()).await.unwrap();
        }

        // 50 is the root; its successor 60 sits two levels down.
        assert_eq!(tree.root().await.unwrap(), Some(key(50)));
        assert!(tree.delete(&key(50)).await.unwrap());
        assert_eq!(tree.root().await.unwrap(), Some(key(60)));

        let remaining: Vec<i64> = tree
            .entries()
            .await
            .unwrap()
            .into_iter()
            .map(|(k, _)| k.count())
            .collect();
        assert_eq!(remaining, vec![20, 30, 40, 60, 65, 70, 80]);
        tree.validate().await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_with_direct_right_successor() {
        let tree = new_tree();
        for i in [2, 1, 3] {
            tree.insert(key(i), &i.to_string()).await.unwrap();
        }
        assert!(tree.delete(&key(2)).await.unwrap());
        assert_eq!(tree.root().await.unwrap(), Some(key(3)));
        assert_eq!(tree.search(&key(1)).await.unwrap(), Some("1".to_string()));
        tree.validate().await.unwrap();
    }

    #[tokio::test]
    async fn test_ascending_inserts_stay_balanced() {
        let tree = new_tree();
        for i in 0..1024 {
            tree.insert(key(i), "x").await.unwrap();
        }
        let stats = tree.validate().await.unwrap();
        assert_eq!(stats.nodes, 1024);
        // A perfectly balanced tree of 1024 nodes has height 11.
        assert_eq!(stats.height, 11);
    }

    #[tokio::test]
    async fn test_shuffled_insert_then_shuffled_delete() {
        let tree = new_tree();
        let mut rng = rand::thread_rng();
        let mut list: Vec<i64> = (0..=200).collect();
        list.shuffle(&mut rng);

        for i in &list {
            tree.insert(key(*i), &i.to_string()).await.unwrap();
        }
        for i in &list {
            assert_eq!(tree.search(&key(*i)).await.unwrap(), Some(i.to_string()));
        }

        let mut order = list.clone();
        order.shuffle(&mut rng);
        for (n, i) in order.iter().enumerate() {
            assert_eq!(tree.search(&key(*i)).await.unwrap(), Some(i.to_string()));
            assert!(tree.delete(&key(*i)).await.unwrap());
            assert_eq!(tree.search(&key(*i)).await.unwrap(), None);

            // Everything not yet deleted is still reachable.
            for other in &order[n + 1..] {
                assert!(tree.search(&key(*other)).await.unwrap().is_some());
            }
            tree.validate().await.unwrap();
        }
        assert!(tree.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_insert_and_delete_one_by_one() {
        let tree = new_tree();
        let mut list: Vec<i64> = (0..2000).collect();
        list.shuffle(&mut rand::thread_rng());
        for i in list {
            tree.insert(key(i), &i.to_string()).await.unwrap();
            assert_eq!(tree.search(&key(i)).await.unwrap(), Some(i.to_string()));
            tree.delete(&key(i)).await.unwrap();
            assert_eq!(tree.search(&key(i)).await.unwrap(), None);
        }
        assert!(tree.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_tombstones_written_for_removed_nodes() {
        let store = Arc::new(MemoryStore::new());
        let tree = AvlTree::new(store.clone(), "test").unwrap();
        tree.insert(key(1), "one").await.unwrap();
        tree.delete(&key(1)).await.unwrap();

        let record = store.get(&tree.namespace().node_key(&key(1))).await.unwrap();
        assert_eq!(record, Some(Vec::new()));
        let root = store.get(&tree.namespace().root_key()).await.unwrap();
        assert_eq!(root, Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_stale_record_never_resurfaces() {
        let store = Arc::new(MemoryStore::new());
        let tree = AvlTree::new(store.clone(), "test").unwrap().without_tombstones();
        for i in 0..10 {
            tree.insert(key(i), &i.to_string()).await.unwrap();
        }
        tree.delete(&key(4)).await.unwrap();

        // The stale record is still in the store but unreachable.
        let record = store.get(&tree.namespace().node_key(&key(4))).await.unwrap();
        assert!(record.is_some_and(|r| !r.is_empty()));
        assert_eq!(tree.search(&key(4)).await.unwrap(), None);
        assert_eq!(tree.validate().await.unwrap().nodes, 9);
    }

    #[tokio::test]
    async fn test_trees_do_not_share_nodes() {
        let store = Arc::new(MemoryStore::new());
        let by_users = AvlTree::new(store.clone(), "channels_by_users").unwrap();
        let by_messages = AvlTree::new(store.clone(), "channels_by_messages").unwrap();

        by_users.insert(key(3), "#a").await.unwrap();
        by_messages.insert(key(3), "#b").await.unwrap();
        by_users.delete(&key(3)).await.unwrap();

        assert_eq!(by_users.search(&key(3)).await.unwrap(), None);
        assert_eq!(by_messages.search(&key(3)).await.unwrap(), Some("#b".to_string()));
    }

    #[tokio::test]
    async fn test_corrupted_node_is_malformed_record() {
        let store = Arc::new(MemoryStore::new());
        let tree = AvlTree::new(store.clone(), "test").unwrap();
        for i in 0..3 {
            tree.insert(key(i), "x").await.unwrap();
        }
        store
            .put(&tree.namespace().node_key(&key(0)), b"garbage-record".to_vec())
            .await
            .unwrap();

        let err = tree.search(&key(0)).await.unwrap_err();
        assert!(matches!(err, Error::MalformedRecord { .. }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_corrupted_root_pointer_is_malformed_record() {
        let store = Arc::new(MemoryStore::new());
        let tree = AvlTree::new(store.clone(), "test").unwrap();
        store
            .put(&tree.namespace().root_key(), b"bogus".to_vec())
            .await
            .unwrap();
        assert!(matches!(
            tree.root().await,
            Err(Error::MalformedRecord { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_child_is_dangling_reference() {
        let store = Arc::new(MemoryStore::new());
        let tree = AvlTree::new(store.clone(), "test").unwrap();
        for i in 0..3 {
            tree.insert(key(i), "x").await.unwrap();
        }
        // Root is 1; wipe its left child without relinking.
        store
            .put(&tree.namespace().node_key(&key(0)), Vec::new())
            .await
            .unwrap();

        assert!(matches!(
            tree.search(&key(0)).await,
            Err(Error::DanglingReference { .. })
        ));
    }

    #[tokio::test]
    async fn test_interrupted_flush_loses_nodes() {
        let store = Arc::new(BudgetStore {
            inner: MemoryStore::new(),
            budget: AtomicUsize::new(usize::MAX),
        });
        let tree = AvlTree::new(store.clone(), "test").unwrap();
        tree.insert(key(1), "one").await.unwrap();
        tree.insert(key(2), "two").await.unwrap();

        // Inserting 3 rotates 1 under 2. Node 1 is flushed first, as a leaf,
        // and the store fails before node 2 or the root pointer land.
        store.budget.store(1, AtomicOrdering::SeqCst);
        let err = tree.insert(key(3), "three").await.unwrap_err();
        assert!(matches!(err, Error::Store(_)));

        assert_eq!(tree.root().await.unwrap(), Some(key(1)));
        let keys: Vec<RankKey> = tree
            .entries()
            .await
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![key(1)]);
        tree.validate().await.unwrap();
    }
}
