//! Bulk remote mutations with partial-failure reconciliation
//!
//! A bulk mutation spans volumes, but the remote API takes one call
//! per volume and reports success per item. [`BatchMutator`] partitions
//! the items, issues the per-volume calls in parallel through the retry
//! wrapper, commits each volume's accepted items locally as soon as
//! that volume's call returns, and collects the per-item failures.
//! One volume failing never rolls back another volume's commit.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use futures::future::join_all;

use common::node::{NodeId, NodeIdentifier, NodeState, VolumeId};
use common::store::NodeStore;

use crate::remote::{PartialFailure, RemoteClient, RemoteError};
use crate::retry::{BackoffPolicy, Completion, RetryingCommand};

/// Why one item of a bulk mutation was not applied
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum BatchError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    /// The volume's remote call never completed (retries exhausted or
    /// cancelled)
    #[error("remote call did not complete")]
    Incomplete,
    #[error("local commit failed: {0}")]
    Commit(String),
}

/// Result of a bulk mutation
///
/// `failed` preserves the order items were submitted in, so the first
/// entry is the failure surfaced to the caller.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub succeeded: Vec<NodeIdentifier>,
    pub failed: Vec<(NodeIdentifier, BatchError)>,
}

impl BatchOutcome {
    pub fn first_failure(&self) -> Option<&BatchError> {
        self.failed.first().map(|(_, error)| error)
    }

    /// Collapse to the caller-facing result, discarding per-item detail
    pub fn into_result(self) -> Result<Vec<NodeIdentifier>, BatchError> {
        match self.failed.into_iter().next() {
            Some((_, error)) => Err(error),
            None => Ok(self.succeeded),
        }
    }
}

/// One logical bulk operation, split into a remote call and a local
/// commit
#[async_trait]
pub trait VolumeMutation: Send + Sync {
    /// Issue the remote batch call for one volume's items, returning
    /// the per-item failures it reported
    async fn apply(
        &self,
        volume: VolumeId,
        items: &[NodeId],
    ) -> Result<Vec<PartialFailure>, RemoteError>;

    /// Persist the items the remote accepted
    async fn commit(
        &self,
        volume: VolumeId,
        succeeded: &[NodeIdentifier],
    ) -> anyhow::Result<()>;
}

/// Applies one [`VolumeMutation`] across volumes
pub struct BatchMutator {
    backoff: BackoffPolicy,
}

impl Default for BatchMutator {
    fn default() -> Self {
        BatchMutator {
            backoff: BackoffPolicy::default(),
        }
    }
}

impl BatchMutator {
    pub fn new(backoff: BackoffPolicy) -> Self {
        BatchMutator { backoff }
    }

    pub async fn run<M: VolumeMutation>(
        &self,
        mutation: &M,
        items: Vec<NodeIdentifier>,
    ) -> BatchOutcome {
        let partitions = partition_by_volume(&items);

        let reports = join_all(partitions.into_iter().map(|(volume, ids)| {
            self.run_volume(mutation, volume, ids)
        }))
        .await;

        let mut outcome = BatchOutcome::default();
        for report in reports {
            outcome.succeeded.extend(report.succeeded);
            outcome.failed.extend(report.failed);
        }
        outcome
    }

    async fn run_volume<M: VolumeMutation>(
        &self,
        mutation: &M,
        volume: VolumeId,
        ids: Vec<NodeId>,
    ) -> BatchOutcome {
        let command = RetryingCommand::new(self.backoff);
        let completion = command
            .run(|| mutation.apply(volume, &ids), RemoteError::is_retryable)
            .await;

        let identify = |id: &NodeId| NodeIdentifier {
            volume,
            node: *id,
        };

        let failures = match completion {
            Completion::Done(failures) => failures,
            Completion::Failed(error) => {
                tracing::warn!(%volume, %error, "volume batch call rejected");
                return BatchOutcome {
                    succeeded: vec![],
                    failed: ids
                        .iter()
                        .map(|id| (identify(id), BatchError::Remote(error.clone())))
                        .collect(),
                };
            }
            Completion::Incomplete => {
                return BatchOutcome {
                    succeeded: vec![],
                    failed: ids
                        .iter()
                        .map(|id| (identify(id), BatchError::Incomplete))
                        .collect(),
                };
            }
        };

        let failed_ids: HashSet<NodeId> = failures.iter().map(|failure| failure.id).collect();
        let failure_errors: HashMap<NodeId, RemoteError> = failures
            .into_iter()
            .map(|failure| (failure.id, failure.error))
            .collect();

        let succeeded: Vec<NodeIdentifier> = ids
            .iter()
            .filter(|id| !failed_ids.contains(id))
            .map(identify)
            .collect();
        let mut failed: Vec<(NodeIdentifier, BatchError)> = ids
            .iter()
            .filter(|id| failed_ids.contains(id))
            .map(|id| {
                let error = failure_errors
                    .get(id)
                    .cloned()
                    .unwrap_or(RemoteError::Api {
                        code: 0,
                        message: "unreported failure".to_string(),
                    });
                (identify(id), BatchError::Remote(error))
            })
            .collect();

        // Successes are committed per volume, immediately, so a slow or
        // failing sibling volume cannot block them
        if !succeeded.is_empty() {
            if let Err(error) = mutation.commit(volume, &succeeded).await {
                tracing::error!(%volume, %error, "local commit failed after remote success");
                failed.extend(
                    succeeded
                        .iter()
                        .map(|id| (*id, BatchError::Commit(error.to_string()))),
                );
                return BatchOutcome {
                    succeeded: vec![],
                    failed,
                };
            }
        }

        BatchOutcome { succeeded, failed }
    }
}

fn partition_by_volume(items: &[NodeIdentifier]) -> Vec<(VolumeId, Vec<NodeId>)> {
    let mut order: Vec<VolumeId> = Vec::new();
    let mut map: HashMap<VolumeId, Vec<NodeId>> = HashMap::new();
    for item in items {
        match map.entry(item.volume) {
            std::collections::hash_map::Entry::Vacant(entry) => {
                order.push(item.volume);
                entry.insert(vec![item.node]);
            }
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                entry.get_mut().push(item.node);
            }
        }
    }
    order
        .into_iter()
        .filter_map(|volume| map.remove(&volume).map(|ids| (volume, ids)))
        .collect()
}

/// Moves nodes to trash across volumes
pub struct NodeTrasher<R, S> {
    remote: R,
    store: S,
    mutator: BatchMutator,
}

impl<R: RemoteClient, S: NodeStore> NodeTrasher<R, S> {
    pub fn new(remote: R, store: S) -> Self {
        NodeTrasher {
            remote,
            store,
            mutator: BatchMutator::default(),
        }
    }

    pub fn with_backoff(remote: R, store: S, backoff: BackoffPolicy) -> Self {
        NodeTrasher {
            remote,
            store,
            mutator: BatchMutator::new(backoff),
        }
    }

    /// Trash the given nodes, committing locally whatever the remote
    /// accepted
    ///
    /// On partial failure the first failed item's error is returned;
    /// items the remote accepted stay trashed locally regardless.
    pub async fn trash(&self, items: Vec<NodeIdentifier>) -> Result<Vec<NodeIdentifier>, BatchError> {
        let outcome = self.mutator.run(self, items).await;
        if let Some((id, error)) = outcome.failed.first() {
            tracing::warn!(%id, %error, failed = outcome.failed.len(), "trash partially failed");
        }
        outcome.into_result()
    }
}

#[async_trait]
impl<R: RemoteClient, S: NodeStore> VolumeMutation for NodeTrasher<R, S> {
    async fn apply(
        &self,
        volume: VolumeId,
        items: &[NodeId],
    ) -> Result<Vec<PartialFailure>, RemoteError> {
        let response = self
            .remote
            .trash_volume_nodes(volume, items.to_vec())
            .await?;
        Ok(response
            .responses
            .iter()
            .filter_map(PartialFailure::from_item)
            .collect())
    }

    async fn commit(
        &self,
        volume: VolumeId,
        succeeded: &[NodeIdentifier],
    ) -> anyhow::Result<()> {
        tracing::debug!(%volume, count = succeeded.len(), "marking nodes trashed");
        self.store
            .set_state(succeeded, NodeState::Trashed)
            .await
            .map_err(|error| anyhow::anyhow!("{error}"))
    }
}
