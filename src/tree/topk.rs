use crate::encoding::keycode::RankKey;
use crate::error::{Error, Result};
use crate::store::ByteStore;

use super::{AvlTree, Node, NodeRef};

/// Deeper than any AVL tree that fits in a 64-bit key space; hitting it means
/// the child pointers form a cycle.
const MAX_DEPTH: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Ascending,
    Descending,
}

/// In-order traversal of a persisted tree with an explicit stack. Each node
/// is read once, when the walk first reaches it. Not restartable: a new walk
/// starts from the root pointer as it is at that moment.
pub struct Walk<'t, S> {
    tree: &'t AvlTree<S>,
    order: Order,
    stack: Vec<(RankKey, Node)>,
    cursor: NodeRef,
    started: bool,
}

impl<'t, S: ByteStore> Walk<'t, S> {
    pub fn new(tree: &'t AvlTree<S>, order: Order) -> Self {
        Self {
            tree,
            order,
            stack: Vec::new(),
            cursor: None,
            started: false,
        }
    }

    pub async fn next(&mut self) -> Result<Option<(RankKey, String)>> {
        if !self.started {
            self.cursor = self.tree.root().await?;
            self.started = true;
        }

        while let Some(key) = self.cursor {
            if self.stack.len() >= MAX_DEPTH {
                return Err(Error::Integrity(format!(
                    "tree {} deeper than {MAX_DEPTH} levels",
                    self.tree.name()
                )));
            }
            let node = self.tree.load(&key).await?;
            self.cursor = match self.order {
                Order::Ascending => node.left,
                Order::Descending => node.right,
            };
            self.stack.push((key, node));
        }

        let Some((key, node)) = self.stack.pop() else {
            return Ok(None);
        };
        self.cursor = match self.order {
            Order::Ascending => node.right,
            Order::Descending => node.left,
        };
        Ok(Some((key, node.payload)))
    }
}

impl<S: ByteStore> AvlTree<S> {
    pub fn walk(&self, order: Order) -> Walk<'_, S> {
        Walk::new(self, order)
    }

    /// Payloads of the `n` largest rank keys, largest first.
    pub async fn top_k(&self, n: usize) -> Result<Vec<String>> {
        Ok(self
            .top_k_entries(n)
            .await?
            .into_iter()
            .map(|(_, payload)| payload)
            .collect())
    }

    /// Like [`AvlTree::top_k`] but keeps the rank keys.
    pub async fn top_k_entries(&self, n: usize) -> Result<Vec<(RankKey, String)>> {
        let mut out = Vec::with_capacity(n.min(64));
        if n == 0 {
            return Ok(out);
        }

        let mut walk = self.walk(Order::Descending);
        while let Some(entry) = walk.next().await? {
            out.push(entry);
            if out.len() == n {
                break;
            }
        }
        Ok(out)
    }

    /// Every entry in ascending rank order.
    pub async fn entries(&self) -> Result<Vec<(RankKey, String)>> {
        let mut out = Vec::new();
        let mut walk = self.walk(Order::Ascending);
        while let Some(entry) = walk.next().await? {
            out.push(entry);
        }
        Ok(out)
    }
}
