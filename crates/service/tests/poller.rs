//! Integration tests for event polling over realistic encrypted trees

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use common::node::{NodeId, NodeIdentifier, NodeState, VolumeId};
use common::store::NodeStore;
use common::testkit::TestVault;
use service::prelude::*;
use service::remote::{EventBatch, TrashResponse};

#[derive(Clone, Default)]
struct ScriptedRemote {
    batches: Arc<Mutex<HashMap<VolumeId, VecDeque<Result<EventBatch, RemoteError>>>>>,
    seen_anchors: Arc<Mutex<Vec<Option<Anchor>>>>,
}

impl ScriptedRemote {
    fn push(&self, volume: VolumeId, batch: Result<EventBatch, RemoteError>) {
        self.batches.lock().entry(volume).or_default().push_back(batch);
    }

    fn seen_anchors(&self) -> Vec<Option<Anchor>> {
        self.seen_anchors.lock().clone()
    }
}

#[async_trait]
impl RemoteClient for ScriptedRemote {
    async fn get_events(
        &self,
        volume: VolumeId,
        anchor: Option<Anchor>,
    ) -> Result<EventBatch, RemoteError> {
        self.seen_anchors.lock().push(anchor.clone());
        match self.batches.lock().get_mut(&volume).and_then(|queue| queue.pop_front()) {
            Some(result) => result,
            None => Ok(EventBatch {
                events: vec![],
                next_anchor: anchor.unwrap_or(Anchor("0".to_string())),
            }),
        }
    }

    async fn trash_volume_nodes(
        &self,
        _volume: VolumeId,
        _link_ids: Vec<NodeId>,
    ) -> Result<TrashResponse, RemoteError> {
        Ok(TrashResponse { responses: vec![] })
    }
}

fn poller_for(
    vault: &TestVault,
    remote: ScriptedRemote,
) -> EventPoller<
    ScriptedRemote,
    common::store::MemoryNodeStore,
    common::testkit::MapSignerResolver,
    common::testkit::RecordingMonitor,
> {
    let scheduler = Arc::new(VolumePriorityScheduler::new(PollThresholds::production()));
    scheduler.track(vault.volume, VolumeClass::Own);
    EventPoller::new(
        Arc::new(remote),
        vault.store.clone(),
        vault.signers.clone(),
        vault.monitor.clone(),
        scheduler,
    )
}

#[tokio::test]
async fn test_upserts_applied_after_resolution() {
    let mut vault = TestVault::new().await;
    let folder = vault.add_folder(vault.root(), "incoming").await;
    let file = vault.add_file(folder, "fresh.txt", 64).await;

    // Lift the records back out of the store and serve them as events
    let folder_node = vault.store.node_or_err(&folder).await.unwrap();
    let file_node = vault.store.node_or_err(&file).await.unwrap();
    vault.store.remove_node(&folder);
    vault.store.remove_node(&file);

    let remote = ScriptedRemote::default();
    remote.push(
        vault.volume,
        Ok(EventBatch {
            events: vec![
                VolumeEvent::Upsert(folder_node),
                VolumeEvent::Upsert(file_node),
            ],
            next_anchor: Anchor("1".to_string()),
        }),
    );

    let poller = poller_for(&vault, remote);
    poller.poll_due().await;

    assert!(vault.store.node(&folder).await.unwrap().is_some());
    assert!(vault.store.node(&file).await.unwrap().is_some());
    assert_eq!(poller.anchor(&vault.volume), Some(Anchor("1".to_string())));

    // The applied records still resolve from the real store
    let material = vault.resolver().resolve(&file).await.unwrap();
    assert_eq!(material.name, "fresh.txt");
}

#[tokio::test]
async fn test_unresolvable_upsert_is_skipped() {
    let mut vault = TestVault::new().await;
    let file = vault.add_file(vault.root(), "good.txt", 64).await;

    let good_node = vault.store.node_or_err(&file).await.unwrap();
    vault.store.remove_node(&file);

    // An orphan whose parent record exists nowhere
    let mut orphan_node = good_node.clone();
    orphan_node.id = NodeIdentifier::new(vault.volume, NodeId::generate());
    orphan_node.parent = Some(NodeId::generate());
    let orphan = orphan_node.id;

    let remote = ScriptedRemote::default();
    remote.push(
        vault.volume,
        Ok(EventBatch {
            events: vec![
                VolumeEvent::Upsert(orphan_node),
                VolumeEvent::Upsert(good_node),
            ],
            next_anchor: Anchor("1".to_string()),
        }),
    );

    let poller = poller_for(&vault, remote);
    poller.poll_due().await;

    assert!(vault.store.node(&file).await.unwrap().is_some());
    assert!(vault.store.node(&orphan).await.unwrap().is_none());
    // The rest of the batch still lands and the anchor advances
    assert_eq!(poller.anchor(&vault.volume), Some(Anchor("1".to_string())));
}

#[tokio::test]
async fn test_state_transitions_applied_in_order() {
    let mut vault = TestVault::new().await;
    let file = vault.add_file(vault.root(), "cycle.txt", 8).await;

    let remote = ScriptedRemote::default();
    remote.push(
        vault.volume,
        Ok(EventBatch {
            events: vec![VolumeEvent::Trashed(file), VolumeEvent::Restored(file)],
            next_anchor: Anchor("1".to_string()),
        }),
    );

    let poller = poller_for(&vault, remote);
    poller.poll_due().await;

    let node = vault.store.node_or_err(&file).await.unwrap();
    assert_eq!(node.state, NodeState::Active);
}

#[tokio::test]
async fn test_failed_poll_keeps_anchor_and_loop_recovers() {
    let vault = TestVault::new().await;

    let remote = ScriptedRemote::default();
    remote.push(
        vault.volume,
        Err(RemoteError::Api { code: 500, message: "unavailable".to_string() }),
    );

    let poller = poller_for(&vault, remote);
    poller.poll_due().await;

    assert_eq!(poller.anchor(&vault.volume), None);
    // The loop went back to idle; force it due and poll again
    poller.scheduler().force_due(&vault.volume);
    poller.poll_due().await;
    assert_eq!(poller.anchor(&vault.volume), Some(Anchor("0".to_string())));
}

#[tokio::test]
async fn test_anchor_is_carried_between_polls() {
    let vault = TestVault::new().await;

    let remote = ScriptedRemote::default();
    remote.push(
        vault.volume,
        Ok(EventBatch { events: vec![], next_anchor: Anchor("7".to_string()) }),
    );

    let poller = poller_for(&vault, remote.clone());
    poller.poll_due().await;
    poller.scheduler().force_due(&vault.volume);
    poller.poll_due().await;

    assert_eq!(
        remote.seen_anchors(),
        vec![None, Some(Anchor("7".to_string()))]
    );
}

#[tokio::test]
async fn test_run_loop_polls_on_command() {
    let mut vault = TestVault::new().await;
    let file = vault.add_file(vault.root(), "queued.txt", 8).await;

    let remote = ScriptedRemote::default();
    remote.push(
        vault.volume,
        Ok(EventBatch {
            events: vec![VolumeEvent::Trashed(file)],
            next_anchor: Anchor("1".to_string()),
        }),
    );

    let poller = Arc::new(poller_for(&vault, remote));
    let (tx, rx) = flume::unbounded();

    let runner = poller.clone();
    let handle = tokio::spawn(async move { runner.run(rx).await });

    tx.send_async(PollCommand::ForcePoll(vault.volume)).await.unwrap();
    tx.send_async(PollCommand::Shutdown).await.unwrap();
    handle.await.unwrap();

    let node = vault.store.node_or_err(&file).await.unwrap();
    assert_eq!(node.state, NodeState::Trashed);
}
