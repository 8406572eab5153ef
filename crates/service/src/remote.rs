//! Typed surface of the remote encrypted store
//!
//! The wire format and endpoint plumbing live in whatever client
//! implements [`RemoteClient`]; this module only names the operations the
//! sync core consumes and the per-item detail it needs back. Bulk
//! responses must expose enough to extract per-item failures: the
//! declared unit of success is the batch, the actual semantics are
//! per item.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use common::node::{Node, NodeId, NodeIdentifier, VolumeId};

/// Errors surfaced by the remote client
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RemoteError {
    /// Connectivity-class failure (DNS, refused, reset, offline)
    #[error("network error: {0}")]
    Network(String),
    /// The request did not complete in time
    #[error("request timed out")]
    Timeout,
    /// The API answered and said no
    #[error("api error {code}: {message}")]
    Api { code: u16, message: String },
    /// The request was cancelled locally
    #[error("request cancelled")]
    Cancelled,
}

impl RemoteError {
    /// Whether retrying can plausibly help
    ///
    /// Only the connectivity class is retryable; application-level
    /// rejections are terminal no matter their code.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Network(_) | RemoteError::Timeout)
    }
}

/// Per-item entry of a bulk response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemResult {
    pub id: NodeId,
    pub code: u16,
    pub error: Option<String>,
}

/// A per-item failure extracted from an otherwise-successful batch
/// response
///
/// Created from a batch response, consumed immediately to decide which
/// items to commit locally; never stored.
#[derive(Debug, Clone)]
pub struct PartialFailure {
    pub id: NodeId,
    pub error: RemoteError,
}

impl PartialFailure {
    /// Extract a failure from a response item, `None` if the item
    /// succeeded
    pub fn from_item(item: &ItemResult) -> Option<Self> {
        if (200..300).contains(&item.code) {
            return None;
        }
        Some(PartialFailure {
            id: item.id,
            error: RemoteError::Api {
                code: item.code,
                message: item.error.clone().unwrap_or_else(|| "unspecified".to_string()),
            },
        })
    }
}

/// Response of a bulk trash call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrashResponse {
    pub responses: Vec<ItemResult>,
}

/// Opaque cursor into a volume's remote event stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor(pub String);

/// One event from a volume's stream
///
/// Upserts carry the full (encrypted) node record; state changes carry
/// bare identifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum VolumeEvent {
    Upsert(Node),
    Trashed(NodeIdentifier),
    Restored(NodeIdentifier),
    Deleted(NodeIdentifier),
}

/// A page of events plus the cursor to resume from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBatch {
    pub events: Vec<VolumeEvent>,
    pub next_anchor: Anchor,
}

/// Remote operations the sync core depends on
#[async_trait]
pub trait RemoteClient: Send + Sync + 'static {
    /// Fetch events for a volume after `anchor` (`None` = from the start)
    async fn get_events(
        &self,
        volume: VolumeId,
        anchor: Option<Anchor>,
    ) -> Result<EventBatch, RemoteError>;

    /// Move a set of nodes within one volume to trash
    async fn trash_volume_nodes(
        &self,
        volume: VolumeId,
        link_ids: Vec<NodeId>,
    ) -> Result<TrashResponse, RemoteError>;
}
