//! Pending-execution bridge between the network side and the host thread.
//!
//! A submitted script travels to the host as a [`HostJob`] holding the
//! sending half of a single-slot channel and a [`CancelHandle`]. The network
//! side keeps the receiving half in a [`PendingExecution`] and waits on it
//! with a deadline.
//!
//! Every submission ends in exactly one of:
//! - a consumed result (`Completed` / `Failed`),
//! - a timeout, after which a late result is discarded by the job itself,
//! - an abandoned job the host dropped without running.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::host::{HostJob, HostScheduler, ScriptEngine, ScriptFailure};

static NEXT_EXECUTION_ID: AtomicU64 = AtomicU64::new(1);

/// Handle for cooperative cancellation of a submitted script.
///
/// Clones share one flag. Cancelling cannot interrupt a script that is
/// already running; it only stops a job that has not started yet.
///
/// # Example
///
/// ```
/// use ramen_core::bridge::CancelHandle;
///
/// let handle = CancelHandle::new();
/// let waiter_side = handle.clone();
///
/// assert!(!handle.is_cancelled());
/// waiter_side.cancel();
/// assert!(handle.is_cancelled());
/// ```
#[derive(Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Create a new, uncancelled handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Clear the flag so the handle can be reused.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::Release);
    }
}

/// How a pending execution ended, from the waiter's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Script ran to completion.
    Completed,
    /// Script raised; carries the diagnostic.
    Failed(String),
    /// No result arrived within the deadline. The job may still run later.
    TimedOut(Duration),
    /// The host dropped the job without running it.
    Abandoned,
}

type ResultSlot = oneshot::Sender<Result<(), ScriptFailure>>;

/// One in-flight script submission, owned by the waiting side.
pub struct PendingExecution {
    id: u64,
    result: oneshot::Receiver<Result<(), ScriptFailure>>,
    cancel: CancelHandle,
}

/// Hand `script` to the host and return the pending execution to wait on.
///
/// This only schedules; it never runs the script on the calling thread.
pub fn submit<S>(scheduler: &S, script: String) -> PendingExecution
where
    S: HostScheduler + ?Sized,
{
    let id = NEXT_EXECUTION_ID.fetch_add(1, Ordering::Relaxed);
    let (tx, rx) = oneshot::channel();
    let cancel = CancelHandle::new();

    tracing::debug!(execution = id, bytes = script.len(), "Scheduling script on host");
    scheduler.schedule_once(execution_job(id, script, tx, cancel.clone()));

    PendingExecution {
        id,
        result: rx,
        cancel,
    }
}

impl PendingExecution {
    /// Identifier used in logs.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The cancellation flag shared with the scheduled job.
    pub fn cancel_handle(&self) -> &CancelHandle {
        &self.cancel
    }

    /// Wait up to `timeout` for the host to run the script.
    ///
    /// On timeout the job is flagged as cancelled and the receiving half is
    /// dropped, so a late result is discarded on the host side.
    pub async fn wait(self, timeout: Duration) -> ExecutionOutcome {
        let Self { id, result, cancel } = self;

        match tokio::time::timeout(timeout, result).await {
            Ok(Ok(Ok(()))) => ExecutionOutcome::Completed,
            Ok(Ok(Err(failure))) => ExecutionOutcome::Failed(failure.message().to_string()),
            Ok(Err(_)) => {
                tracing::warn!(execution = id, "Host dropped the script without running it");
                ExecutionOutcome::Abandoned
            }
            Err(_) => {
                cancel.cancel();
                tracing::warn!(execution = id, ?timeout, "Timed out waiting for the host");
                ExecutionOutcome::TimedOut(timeout)
            }
        }
    }
}

/// Build the callback that runs on the host thread.
///
/// All outcomes, panics included, go through the result slot; nothing
/// unwinds into the host's scheduler.
fn execution_job(id: u64, script: String, slot: ResultSlot, cancel: CancelHandle) -> HostJob {
    Box::new(move |engine: &mut dyn ScriptEngine| {
        if cancel.is_cancelled() {
            tracing::debug!(execution = id, "Skipping cancelled script");
            return;
        }

        let result = panic::catch_unwind(AssertUnwindSafe(|| engine.execute(&script)))
            .unwrap_or_else(|payload| {
                Err(ScriptFailure::new(format!(
                    "script engine panicked: {}",
                    panic_message(payload.as_ref())
                )))
            });

        match &result {
            Ok(()) => tracing::debug!(execution = id, "Script completed"),
            Err(failure) => tracing::debug!(execution = id, %failure, "Script failed"),
        }

        if slot.send(result).is_err() {
            tracing::debug!(execution = id, "Waiter is gone, discarding late result");
        }
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
