use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::{NodeStore, StoreError};
use crate::node::{Node, NodeIdentifier, NodeState, Share, ShareId};

/// In-memory node store using HashMaps
///
/// Reference implementation of the [`NodeStore`] contract and the store
/// used by tests. One `RwLock` over the whole state makes every mutating
/// call trivially atomic.
#[derive(Debug, Clone, Default)]
pub struct MemoryNodeStore {
    inner: Arc<RwLock<MemoryNodeStoreInner>>,
}

#[derive(Debug, Default)]
struct MemoryNodeStoreInner {
    nodes: HashMap<NodeIdentifier, Node>,
    shares: HashMap<ShareId, Share>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryNodeStoreError {
    #[error("memory store error: {0}")]
    Internal(String),
}

impl MemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes currently held. Test helper.
    pub fn node_count(&self) -> usize {
        self.inner.read().map(|inner| inner.nodes.len()).unwrap_or(0)
    }

    /// Remove a node record outright. Test helper for constructing
    /// broken hierarchies; real deletions are state transitions.
    pub fn remove_node(&self, id: &NodeIdentifier) {
        if let Ok(mut inner) = self.inner.write() {
            inner.nodes.remove(id);
        }
    }
}

fn lock_err(op: &str) -> StoreError<MemoryNodeStoreError> {
    StoreError::Provider(MemoryNodeStoreError::Internal(format!(
        "failed to acquire {} lock",
        op
    )))
}

#[async_trait]
impl NodeStore for MemoryNodeStore {
    type Error = MemoryNodeStoreError;

    async fn node(&self, id: &NodeIdentifier) -> Result<Option<Node>, StoreError<Self::Error>> {
        let inner = self.inner.read().map_err(|_| lock_err("read"))?;
        Ok(inner.nodes.get(id).cloned())
    }

    async fn share(&self, id: &ShareId) -> Result<Option<Share>, StoreError<Self::Error>> {
        let inner = self.inner.read().map_err(|_| lock_err("read"))?;
        Ok(inner.shares.get(id).cloned())
    }

    async fn upsert_share(&self, share: Share) -> Result<(), StoreError<Self::Error>> {
        let mut inner = self.inner.write().map_err(|_| lock_err("write"))?;
        inner.shares.insert(share.id, share);
        Ok(())
    }

    async fn apply_events(
        &self,
        upserts: Vec<Node>,
        transitions: Vec<(NodeIdentifier, NodeState)>,
    ) -> Result<(), StoreError<Self::Error>> {
        let mut inner = self.inner.write().map_err(|_| lock_err("write"))?;
        for node in upserts {
            inner.nodes.insert(node.id, node);
        }
        for (id, state) in transitions {
            if let Some(node) = inner.nodes.get_mut(&id) {
                node.state = state;
            }
        }
        Ok(())
    }

    async fn set_state(
        &self,
        ids: &[NodeIdentifier],
        state: NodeState,
    ) -> Result<(), StoreError<Self::Error>> {
        let mut inner = self.inner.write().map_err(|_| lock_err("write"))?;
        for id in ids {
            if let Some(node) = inner.nodes.get_mut(id) {
                node.state = state;
            }
        }
        Ok(())
    }
}
