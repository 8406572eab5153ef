//! Per-volume event polling
//!
//! One [`EventPoller`] services every tracked volume. Each poll fetches
//! the volume's event batch through the retry wrapper, resolves every
//! upserted node's key chain against a staged view of the store, then
//! applies the batch atomically and advances the anchor. Nodes whose
//! chains do not resolve are skipped with a warning rather than merged
//! as unverifiable metadata.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use common::integrity::IntegrityMonitor;
use common::node::{Node, NodeIdentifier, NodeState, Share, ShareId, VolumeId};
use common::resolver::{KeyChainResolver, SignerResolver};
use common::store::{NodeStore, StoreError};

use crate::remote::{Anchor, RemoteClient, RemoteError, VolumeEvent};
use crate::retry::{BackoffPolicy, Completion, RetryingCommand};
use crate::scheduler::VolumePriorityScheduler;

/// Control messages for the poller's run loop
#[derive(Debug, Clone)]
pub enum PollCommand {
    /// Poll whatever loops are currently due
    Tick,
    /// Poll one volume now, regardless of its threshold
    ForcePoll(VolumeId),
    Shutdown,
}

/// Fetches, verifies and applies remote volume events
pub struct EventPoller<R, S, G, M> {
    remote: Arc<R>,
    store: S,
    signers: G,
    monitor: M,
    scheduler: Arc<VolumePriorityScheduler>,
    anchors: Mutex<HashMap<VolumeId, Anchor>>,
    backoff: BackoffPolicy,
}

impl<R, S, G, M> EventPoller<R, S, G, M>
where
    R: RemoteClient,
    S: NodeStore,
    G: SignerResolver + Clone,
    M: IntegrityMonitor + Clone,
{
    pub fn new(
        remote: Arc<R>,
        store: S,
        signers: G,
        monitor: M,
        scheduler: Arc<VolumePriorityScheduler>,
    ) -> Self {
        EventPoller {
            remote,
            store,
            signers,
            monitor,
            scheduler,
            anchors: Mutex::new(HashMap::new()),
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn scheduler(&self) -> &VolumePriorityScheduler {
        &self.scheduler
    }

    /// Current anchor for a volume, `None` before its first successful
    /// poll
    pub fn anchor(&self, volume: &VolumeId) -> Option<Anchor> {
        self.anchors.lock().get(volume).cloned()
    }

    /// Process control messages until shutdown
    pub async fn run(&self, commands: flume::Receiver<PollCommand>) {
        while let Ok(command) = commands.recv_async().await {
            match command {
                PollCommand::Tick => self.poll_due().await,
                PollCommand::ForcePoll(volume) => {
                    self.scheduler.force_due(&volume);
                    self.poll_due().await;
                }
                PollCommand::Shutdown => {
                    tracing::info!("event poller shutting down");
                    break;
                }
            }
        }
    }

    /// Poll every loop that is due, most urgent first
    pub async fn poll_due(&self) {
        for (volume, priority) in self.scheduler.due_loops(Utc::now()) {
            if !self.scheduler.begin_poll(&volume) {
                continue;
            }
            tracing::debug!(%volume, ?priority, "polling volume");
            if let Err(error) = self.poll_volume(volume).await {
                tracing::warn!(%volume, %error, "poll failed");
            }
            // last_polled advances on failure too, so a broken volume
            // does not starve the rest of the pool
            self.scheduler.finish_poll(&volume, Utc::now());
        }
    }

    async fn poll_volume(&self, volume: VolumeId) -> anyhow::Result<()> {
        let anchor = self.anchors.lock().get(&volume).cloned();

        let command = RetryingCommand::new(self.backoff);
        let completion = command
            .run(
                || self.remote.get_events(volume, anchor.clone()),
                RemoteError::is_retryable,
            )
            .await;

        let batch = match completion {
            Completion::Done(batch) => batch,
            Completion::Failed(error) => return Err(error.into()),
            Completion::Incomplete => anyhow::bail!("event fetch did not complete"),
        };

        let event_count = batch.events.len();
        let (upserts, transitions) = self.verify_events(volume, batch.events).await?;

        self.store
            .apply_events(upserts, transitions)
            .await
            .map_err(|error| anyhow::anyhow!("{error}"))?;
        self.anchors.lock().insert(volume, batch.next_anchor);

        tracing::debug!(%volume, events = event_count, "poll applied");
        Ok(())
    }

    /// Split a batch into resolvable upserts and state transitions
    ///
    /// Each upsert is resolved against the store plus the batch's
    /// earlier upserts, in stream order, so a child arriving in the
    /// same batch as its new parent still verifies.
    async fn verify_events(
        &self,
        volume: VolumeId,
        events: Vec<VolumeEvent>,
    ) -> anyhow::Result<(Vec<Node>, Vec<(NodeIdentifier, NodeState)>)> {
        let staged = StagedStore::new(self.store.clone());
        let resolver = KeyChainResolver::new(
            staged.clone(),
            self.signers.clone(),
            self.monitor.clone(),
        );

        let mut upserts = Vec::new();
        let mut transitions = Vec::new();
        for event in events {
            match event {
                VolumeEvent::Upsert(node) => {
                    let id = node.id;
                    staged.stage(node.clone());
                    match resolver.resolve(&id).await {
                        Ok(_) => upserts.push(node),
                        Err(error) => {
                            staged.unstage(&id);
                            tracing::warn!(%volume, %id, %error, "skipping unresolvable node event");
                        }
                    }
                }
                VolumeEvent::Trashed(id) => transitions.push((id, NodeState::Trashed)),
                VolumeEvent::Restored(id) => transitions.push((id, NodeState::Active)),
                VolumeEvent::Deleted(id) => transitions.push((id, NodeState::Deleted)),
            }
        }
        Ok((upserts, transitions))
    }
}

/// Read-through store view layering uncommitted nodes over a base store
///
/// Lets the resolver see a batch's earlier upserts before anything is
/// committed. Writes pass through to the base, but the poller never
/// writes through this view.
#[derive(Clone)]
struct StagedStore<S> {
    base: S,
    staged: Arc<RwLock<HashMap<NodeIdentifier, Node>>>,
}

impl<S> StagedStore<S> {
    fn new(base: S) -> Self {
        StagedStore {
            base,
            staged: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn stage(&self, node: Node) {
        self.staged.write().insert(node.id, node);
    }

    fn unstage(&self, id: &NodeIdentifier) {
        self.staged.write().remove(id);
    }
}

#[async_trait]
impl<S: NodeStore> NodeStore for StagedStore<S> {
    type Error = S::Error;

    async fn node(&self, id: &NodeIdentifier) -> Result<Option<Node>, StoreError<Self::Error>> {
        if let Some(node) = self.staged.read().get(id).cloned() {
            return Ok(Some(node));
        }
        self.base.node(id).await
    }

    async fn share(&self, id: &ShareId) -> Result<Option<Share>, StoreError<Self::Error>> {
        self.base.share(id).await
    }

    async fn upsert_share(&self, share: Share) -> Result<(), StoreError<Self::Error>> {
        self.base.upsert_share(share).await
    }

    async fn apply_events(
        &self,
        upserts: Vec<Node>,
        transitions: Vec<(NodeIdentifier, NodeState)>,
    ) -> Result<(), StoreError<Self::Error>> {
        self.base.apply_events(upserts, transitions).await
    }

    async fn set_state(
        &self,
        ids: &[NodeIdentifier],
        state: NodeState,
    ) -> Result<(), StoreError<Self::Error>> {
        self.base.set_state(ids, state).await
    }
}
