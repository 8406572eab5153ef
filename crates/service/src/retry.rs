//! Bounded retry with exponential backoff
//!
//! [`RetryingCommand`] wraps a single fallible async operation. Errors
//! the caller classifies as retryable are retried with a jittered
//! exponential delay, up to a hard attempt cap. Everything else stops
//! the command immediately. The command exposes a "working" signal
//! that is true exactly while an attempt or its preceding sleep is
//! outstanding, and supports out-of-band cancellation.

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

/// Hard cap on attempts per command run
pub const MAX_ATTEMPTS: u32 = 10;

/// Jittered exponential backoff curve
///
/// `delay(attempt)` is `min(base * 2^attempt, cap)` plus a random
/// jitter in `[0, base)`. Pure aside from the jitter draw.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
        }
    }
}

impl BackoffPolicy {
    /// Deterministic part of the curve, before jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Delay to sleep before retrying after `attempt` failed
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter_ms = self.base.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..jitter_ms))
        };
        self.base_delay(attempt) + jitter
    }
}

/// How a command run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion<T, E> {
    /// The operation succeeded
    Done(T),
    /// The operation hit a terminal error
    Failed(E),
    /// Retries were exhausted or the command was cancelled
    Incomplete,
}

impl<T, E> Completion<T, E> {
    pub fn is_done(&self) -> bool {
        matches!(self, Completion::Done(_))
    }
}

/// Executes one async operation with bounded, cancellable retry
pub struct RetryingCommand {
    backoff: BackoffPolicy,
    max_attempts: u32,
    working_tx: watch::Sender<bool>,
    // Cancellation is latched in the flag and signalled through the
    // Notify; the flag covers a cancel that lands before the retry loop
    // has a waiter registered.
    cancelled: AtomicBool,
    cancel: Notify,
}

impl Default for RetryingCommand {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}

impl RetryingCommand {
    pub fn new(backoff: BackoffPolicy) -> Self {
        let (working_tx, _) = watch::channel(false);
        RetryingCommand {
            backoff,
            max_attempts: MAX_ATTEMPTS,
            working_tx,
            cancelled: AtomicBool::new(false),
            cancel: Notify::new(),
        }
    }

    /// Signal that is `true` while a run is outstanding
    pub fn is_working(&self) -> watch::Receiver<bool> {
        self.working_tx.subscribe()
    }

    /// Abort the in-flight attempt and any pending backoff sleep
    ///
    /// Sticky: a command cancelled before its run starts never makes an
    /// attempt.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.cancel.notify_waiters();
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the command is cancelled, including cancels that
    /// landed before this future existed
    async fn wait_cancelled(&self) {
        let notified = self.cancel.notified();
        tokio::pin!(notified);
        // Register the waiter before reading the flag so a concurrent
        // cancel either flips the flag first or wakes the waiter
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }

    /// Run `op` on a background task, returning a handle to observe and
    /// cancel it
    pub fn spawn<T, E, F, Fut, P>(self, op: F, is_retryable: P) -> RetryHandle<T, E>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        P: Fn(&E) -> bool + Send + Sync + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
    {
        let command = Arc::new(self);
        let working = command.is_working();
        let runner = command.clone();
        let task = tokio::spawn(async move { runner.run(op, is_retryable).await });
        RetryHandle {
            working,
            command,
            task,
        }
    }

    /// Run `op` until it succeeds, fails terminally, exhausts the
    /// attempt cap or is cancelled
    ///
    /// `is_retryable` classifies errors; only errors it accepts are
    /// retried. The working signal is cleared on every exit path.
    pub async fn run<T, E, F, Fut>(
        &self,
        mut op: F,
        is_retryable: impl Fn(&E) -> bool,
    ) -> Completion<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let _ = self.working_tx.send(true);
        let completion = self.run_inner(&mut op, &is_retryable).await;
        let _ = self.working_tx.send(false);
        completion
    }

    async fn run_inner<T, E, F, Fut>(
        &self,
        op: &mut F,
        is_retryable: &impl Fn(&E) -> bool,
    ) -> Completion<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        for attempt in 0..self.max_attempts {
            if self.is_cancelled() {
                tracing::debug!(attempt, "command cancelled");
                return Completion::Incomplete;
            }

            let result = tokio::select! {
                biased;
                _ = self.wait_cancelled() => {
                    tracing::debug!(attempt, "command cancelled mid-attempt");
                    return Completion::Incomplete;
                }
                result = op() => result,
            };

            let error = match result {
                Ok(value) => return Completion::Done(value),
                Err(error) if is_retryable(&error) => error,
                Err(error) => {
                    tracing::debug!(attempt, %error, "terminal error, not retrying");
                    return Completion::Failed(error);
                }
            };

            if attempt + 1 == self.max_attempts {
                tracing::error!(
                    attempts = self.max_attempts,
                    %error,
                    "retries exhausted"
                );
                return Completion::Incomplete;
            }

            let delay = self.backoff.delay(attempt);
            tracing::debug!(attempt, ?delay, %error, "retrying after backoff");
            tokio::select! {
                biased;
                _ = self.wait_cancelled() => {
                    tracing::debug!(attempt, "command cancelled during backoff");
                    return Completion::Incomplete;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        Completion::Incomplete
    }
}

/// Handle onto a spawned [`RetryingCommand`]
pub struct RetryHandle<T, E> {
    working: watch::Receiver<bool>,
    command: Arc<RetryingCommand>,
    task: JoinHandle<Completion<T, E>>,
}

impl<T, E> RetryHandle<T, E> {
    /// Whether an attempt or its preceding sleep is outstanding
    pub fn is_working(&self) -> bool {
        *self.working.borrow()
    }

    /// Watch channel tracking the working signal
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.working.clone()
    }

    /// Abort the in-flight attempt and any pending backoff sleep
    pub fn cancel(&self) {
        self.command.cancel();
    }

    /// Wait for the command to finish
    pub async fn join(self) -> Completion<T, E> {
        match self.task.await {
            Ok(completion) => completion,
            Err(error) => {
                tracing::error!(%error, "retry task failed");
                Completion::Incomplete
            }
        }
    }
}
