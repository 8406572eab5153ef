/**
 * Bulk remote mutations with partial-failure
 *  reconciliation; trash is the instantiation
 *  shipped here.
 */
pub mod batch;
/**
 * Per-volume event polling: drives due loops,
 *  fetches event batches through the retry
 *  wrapper, resolves key chains and applies
 *  the results locally.
 */
pub mod poller;
/**
 * Typed surface of the remote API this core
 *  consumes. Transport stays out of scope; this
 *  is the trait the HTTP client implements.
 */
pub mod remote;
/**
 * Bounded retry with exponential backoff for
 *  transient network failures.
 */
pub mod retry;
/**
 * Decides which volume event loops are due to
 *  poll, and at what priority.
 */
pub mod scheduler;

pub mod prelude {
    pub use crate::batch::{BatchError, BatchMutator, BatchOutcome, NodeTrasher, VolumeMutation};
    pub use crate::poller::{EventPoller, PollCommand};
    pub use crate::remote::{
        Anchor, EventBatch, PartialFailure, RemoteClient, RemoteError, VolumeEvent,
    };
    pub use crate::retry::{BackoffPolicy, Completion, RetryHandle, RetryingCommand};
    pub use crate::scheduler::{
        PollPriority, PollThresholds, VolumeClass, VolumePriorityScheduler,
    };
}
