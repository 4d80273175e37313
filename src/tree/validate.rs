use std::collections::HashMap;

use crate::encoding::keycode::RankKey;
use crate::error::{Error, Result};
use crate::store::ByteStore;

use super::{AvlTree, Node, NodeRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeStats {
    pub nodes: usize,
    pub height: u32,
}

impl<S: ByteStore> AvlTree<S> {
    /// Reads the whole tree and checks strict ordering, stored heights and
    /// AVL balance at every node.
    pub async fn validate(&self) -> Result<TreeStats> {
        tracing::debug!(tree = self.name(), "Starting tree validation");

        let root = self.root().await?;
        let mut nodes: HashMap<RankKey, Node> = HashMap::new();
        let mut stack: Vec<RankKey> = root.into_iter().collect();
        while let Some(key) = stack.pop() {
            if nodes.contains_key(&key) {
                return Err(Error::Integrity(format!(
                    "node {key} reachable through more than one pointer"
                )));
            }
            let node = self.load(&key).await?;
            stack.extend(node.left.into_iter().chain(node.right));
            nodes.insert(key, node);
        }

        let height = check(self.name(), &nodes, root, None, None)?;
        let stats = TreeStats {
            nodes: nodes.len(),
            height,
        };
        tracing::debug!(
            tree = self.name(),
            nodes = stats.nodes,
            height = stats.height,
            "Tree validation passed"
        );
        Ok(stats)
    }
}

/// Returns the verified height of the subtree at `at`, whose keys must lie
/// strictly between `lower` and `upper`.
fn check(
    tree: &str,
    nodes: &HashMap<RankKey, Node>,
    at: NodeRef,
    lower: Option<RankKey>,
    upper: Option<RankKey>,
) -> Result<u32> {
    let Some(key) = at else {
        return Ok(0);
    };
    let node = nodes
        .get(&key)
        .ok_or_else(|| Error::Integrity(format!("{tree}: node {key} was not loaded")))?;

    if lower.is_some_and(|lower| key <= lower) || upper.is_some_and(|upper| key >= upper) {
        return Err(Error::Integrity(format!("{tree}: node {key} is out of order")));
    }

    let left = check(tree, nodes, node.left, lower, Some(key))?;
    let right = check(tree, nodes, node.right, Some(key), upper)?;

    if left.abs_diff(right) > 1 {
        return Err(Error::Integrity(format!(
            "{tree}: node {key} is unbalanced (left {left}, right {right})"
        )));
    }
    let height = 1 + left.max(right);
    if node.height != height {
        return Err(Error::Integrity(format!(
            "{tree}: node {key} stores height {} but has height {height}",
            node.height
        )));
    }
    Ok(height)
}
