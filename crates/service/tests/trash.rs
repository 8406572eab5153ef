//! Integration tests for bulk trash across volumes

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use common::node::{Node, NodeId, NodeIdentifier, NodeKind, NodeState, VolumeId};
use common::store::{MemoryNodeStore, NodeStore};
use service::prelude::*;
use service::remote::{EventBatch, ItemResult, TrashResponse};

/// Scripted behavior for one volume's trash endpoint
#[derive(Clone)]
enum Script {
    /// Every item accepted
    Accept,
    /// Listed items rejected with 422, the rest accepted
    RejectItems(Vec<NodeId>),
    /// The whole call fails
    Fail(RemoteError),
    /// Fail once with a retryable error, then accept everything
    FlakyOnce(RemoteError),
}

#[derive(Clone, Default)]
struct ScriptedRemote {
    scripts: Arc<Mutex<HashMap<VolumeId, Script>>>,
    calls: Arc<Mutex<Vec<VolumeId>>>,
}

impl ScriptedRemote {
    fn script(&self, volume: VolumeId, script: Script) {
        self.scripts.lock().insert(volume, script);
    }

    fn calls_for(&self, volume: &VolumeId) -> usize {
        self.calls.lock().iter().filter(|v| *v == volume).count()
    }
}

#[async_trait]
impl RemoteClient for ScriptedRemote {
    async fn get_events(
        &self,
        _volume: VolumeId,
        anchor: Option<Anchor>,
    ) -> Result<EventBatch, RemoteError> {
        Ok(EventBatch {
            events: vec![],
            next_anchor: anchor.unwrap_or(Anchor("0".to_string())),
        })
    }

    async fn trash_volume_nodes(
        &self,
        volume: VolumeId,
        link_ids: Vec<NodeId>,
    ) -> Result<TrashResponse, RemoteError> {
        self.calls.lock().push(volume);
        let script = self.scripts.lock().get(&volume).cloned().unwrap_or(Script::Accept);
        let accept_all = |ids: &[NodeId]| TrashResponse {
            responses: ids
                .iter()
                .map(|id| ItemResult { id: *id, code: 200, error: None })
                .collect(),
        };
        match script {
            Script::Accept => Ok(accept_all(&link_ids)),
            Script::RejectItems(rejected) => Ok(TrashResponse {
                responses: link_ids
                    .iter()
                    .map(|id| {
                        if rejected.contains(id) {
                            ItemResult {
                                id: *id,
                                code: 422,
                                error: Some("rejected".to_string()),
                            }
                        } else {
                            ItemResult { id: *id, code: 200, error: None }
                        }
                    })
                    .collect(),
            }),
            Script::Fail(error) => Err(error),
            Script::FlakyOnce(error) => {
                self.scripts.lock().insert(volume, Script::Accept);
                Err(error)
            }
        }
    }
}

fn active_node(id: NodeIdentifier) -> Node {
    Node {
        id,
        parent: Some(NodeId::generate()),
        share: None,
        kind: NodeKind::File,
        state: NodeState::Active,
        encrypted_name: vec![],
        name_signature: None,
        signature_email: None,
        name_hash: String::new(),
        encrypted_passphrase: vec![],
        encrypted_hash_key: None,
        size: 0,
        mime_type: None,
        content_digest: None,
    }
}

async fn seed(store: &MemoryNodeStore, volume: VolumeId, count: usize) -> Vec<NodeIdentifier> {
    let ids: Vec<NodeIdentifier> = (0..count)
        .map(|_| NodeIdentifier::new(volume, NodeId::generate()))
        .collect();
    store
        .apply_events(ids.iter().map(|id| active_node(*id)).collect(), vec![])
        .await
        .unwrap();
    ids
}

async fn state_of(store: &MemoryNodeStore, id: &NodeIdentifier) -> NodeState {
    store.node_or_err(id).await.unwrap().state
}

fn fast_backoff() -> BackoffPolicy {
    BackoffPolicy {
        base: Duration::from_millis(1),
        cap: Duration::from_millis(10),
    }
}

#[tokio::test]
async fn test_mixed_volume_outcomes_commit_per_volume() {
    let store = MemoryNodeStore::new();
    let remote = ScriptedRemote::default();

    // Volume A fully succeeds, B rejects one of five items, C's call
    // fails outright
    let volume_a = VolumeId::generate();
    let volume_b = VolumeId::generate();
    let volume_c = VolumeId::generate();
    let a_items = seed(&store, volume_a, 5).await;
    let b_items = seed(&store, volume_b, 5).await;
    let c_items = seed(&store, volume_c, 2).await;

    remote.script(volume_a, Script::Accept);
    remote.script(volume_b, Script::RejectItems(vec![b_items[2].node]));
    remote.script(
        volume_c,
        Script::Fail(RemoteError::Api { code: 500, message: "unavailable".to_string() }),
    );

    let trasher = NodeTrasher::with_backoff(remote, store.clone(), fast_backoff());
    let mut items = a_items.clone();
    items.extend(&b_items);
    items.extend(&c_items);

    let error = trasher.trash(items).await.unwrap_err();
    // The first failed item in submission order is B's rejected one
    assert_eq!(
        error,
        BatchError::Remote(RemoteError::Api { code: 422, message: "rejected".to_string() })
    );

    for id in &a_items {
        assert_eq!(state_of(&store, id).await, NodeState::Trashed);
    }
    for (index, id) in b_items.iter().enumerate() {
        let expected = if index == 2 { NodeState::Active } else { NodeState::Trashed };
        assert_eq!(state_of(&store, id).await, expected);
    }
    for id in &c_items {
        assert_eq!(state_of(&store, id).await, NodeState::Active);
    }
}

#[tokio::test]
async fn test_partial_failure_surfaces_error_but_commits_successes() {
    let store = MemoryNodeStore::new();
    let remote = ScriptedRemote::default();

    let v1 = VolumeId::generate();
    let v2 = VolumeId::generate();
    let v1_items = seed(&store, v1, 2).await;
    let v2_items = seed(&store, v2, 1).await;
    let (a, b, c) = (v1_items[0], v1_items[1], v2_items[0]);

    remote.script(v1, Script::Accept);
    remote.script(
        v2,
        Script::Fail(RemoteError::Api { code: 409, message: "locked".to_string() }),
    );

    let trasher = NodeTrasher::with_backoff(remote, store.clone(), fast_backoff());
    let error = trasher.trash(vec![a, b, c]).await.unwrap_err();

    assert_eq!(
        error,
        BatchError::Remote(RemoteError::Api { code: 409, message: "locked".to_string() })
    );
    assert_eq!(state_of(&store, &a).await, NodeState::Trashed);
    assert_eq!(state_of(&store, &b).await, NodeState::Trashed);
    assert_eq!(state_of(&store, &c).await, NodeState::Active);
}

#[tokio::test]
async fn test_full_success_returns_all_items() {
    let store = MemoryNodeStore::new();
    let remote = ScriptedRemote::default();

    let volume = VolumeId::generate();
    let items = seed(&store, volume, 3).await;

    let trasher = NodeTrasher::with_backoff(remote, store.clone(), fast_backoff());
    let trashed = trasher.trash(items.clone()).await.unwrap();

    assert_eq!(trashed, items);
    for id in &items {
        assert_eq!(state_of(&store, id).await, NodeState::Trashed);
    }
}

#[tokio::test]
async fn test_transient_network_error_is_retried() {
    let store = MemoryNodeStore::new();
    let remote = ScriptedRemote::default();

    let volume = VolumeId::generate();
    let items = seed(&store, volume, 2).await;
    remote.script(
        volume,
        Script::FlakyOnce(RemoteError::Network("connection reset".to_string())),
    );

    let trasher = NodeTrasher::with_backoff(remote.clone(), store.clone(), fast_backoff());
    trasher.trash(items.clone()).await.unwrap();

    assert_eq!(remote.calls_for(&volume), 2);
    for id in &items {
        assert_eq!(state_of(&store, id).await, NodeState::Trashed);
    }
}

#[tokio::test]
async fn test_terminal_error_is_not_retried() {
    let store = MemoryNodeStore::new();
    let remote = ScriptedRemote::default();

    let volume = VolumeId::generate();
    let items = seed(&store, volume, 1).await;
    remote.script(
        volume,
        Script::Fail(RemoteError::Api { code: 403, message: "forbidden".to_string() }),
    );

    let trasher = NodeTrasher::with_backoff(remote.clone(), store.clone(), fast_backoff());
    let error = trasher.trash(items.clone()).await.unwrap_err();

    assert!(matches!(error, BatchError::Remote(RemoteError::Api { code: 403, .. })));
    assert_eq!(remote.calls_for(&volume), 1);
    assert_eq!(state_of(&store, &items[0]).await, NodeState::Active);
}
