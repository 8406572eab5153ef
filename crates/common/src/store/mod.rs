//! Storage abstraction for the local metadata cache
//!
//! The core never talks to a concrete database; it goes through
//! [`NodeStore`]. Implementations must make every mutating call atomic:
//! a batch either becomes fully visible to subsequent reads or not at
//! all. An ORM-backed implementation would map each mutating call to one
//! transaction.

mod memory;

use std::fmt::{Debug, Display};

use async_trait::async_trait;

use crate::node::{Node, NodeIdentifier, NodeState, Share, ShareId};

pub use memory::{MemoryNodeStore, MemoryNodeStoreError};

#[derive(thiserror::Error, Debug)]
pub enum StoreError<T> {
    /// Unhandled error from the underlying provider
    #[error("unhandled store provider error: {0}")]
    Provider(#[from] T),
    /// A node that must exist does not
    #[error("node not found: {0}")]
    NodeNotFound(NodeIdentifier),
    /// A share that must exist does not
    #[error("share not found: {0}")]
    ShareNotFound(ShareId),
}

/// Local persistence of nodes and shares
///
/// Cloning a store must yield a handle onto the same underlying state.
#[async_trait]
pub trait NodeStore: Send + Sync + Clone + 'static {
    type Error: Display + Debug + Send + Sync + 'static;

    /// Fetch a node, `None` if absent
    async fn node(&self, id: &NodeIdentifier) -> Result<Option<Node>, StoreError<Self::Error>>;

    /// Fetch a node, failing with a typed not-found if absent
    async fn node_or_err(&self, id: &NodeIdentifier) -> Result<Node, StoreError<Self::Error>> {
        self.node(id)
            .await?
            .ok_or(StoreError::NodeNotFound(*id))
    }

    /// Fetch a share, `None` if absent
    async fn share(&self, id: &ShareId) -> Result<Option<Share>, StoreError<Self::Error>>;

    /// Fetch a share, failing with a typed not-found if absent
    async fn share_or_err(&self, id: &ShareId) -> Result<Share, StoreError<Self::Error>> {
        self.share(id)
            .await?
            .ok_or(StoreError::ShareNotFound(*id))
    }

    /// Insert or replace a share record
    async fn upsert_share(&self, share: Share) -> Result<(), StoreError<Self::Error>>;

    /// Apply one poll's worth of changes atomically: record upserts
    /// followed by state transitions. Transitions to nodes that are not
    /// present locally are skipped (the server may reference nodes this
    /// client never materialized).
    async fn apply_events(
        &self,
        upserts: Vec<Node>,
        transitions: Vec<(NodeIdentifier, NodeState)>,
    ) -> Result<(), StoreError<Self::Error>>;

    /// Atomically transition a set of nodes to a state. Used by bulk
    /// mutations to commit exactly the items the remote accepted.
    async fn set_state(
        &self,
        ids: &[NodeIdentifier],
        state: NodeState,
    ) -> Result<(), StoreError<Self::Error>>;
}
