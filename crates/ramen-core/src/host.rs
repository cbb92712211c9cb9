//! Host execution context boundary.
//!
//! The host application owns a single thread and an interpreter living on it.
//! The live-link never runs scripts itself; it hands a [`HostJob`] to a
//! [`HostScheduler`] and the host runs it against its [`ScriptEngine`] at its
//! own cadence.
//!
//! [`cooperative`] builds a ready-made scheduler for hosts that do not have
//! one: a thread-safe [`HostHandle`] paired with a [`HostLoop`] that the host
//! thread drains.
//!
//! ```text
//! network thread                      host thread
//!     │                                   │
//!     ├── HostHandle::schedule_once ──►  queue
//!     │                                   │
//!     │                             HostLoop::pump / run_pending
//!     │                                   └── job(&mut engine)
//! ```

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::time::Duration;

use thiserror::Error;

/// Diagnostic produced by a script that failed while running.
///
/// Carries the full trace or description reported by the interpreter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ScriptFailure {
    message: String,
}

impl ScriptFailure {
    /// Create a failure with the given diagnostic text.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The diagnostic text.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// The host's ambient global state: something that can run a script.
///
/// Engines live on the host thread and are never required to be `Send`.
pub trait ScriptEngine {
    /// Run `script` to completion.
    fn execute(&mut self, script: &str) -> Result<(), ScriptFailure>;
}

impl<F> ScriptEngine for F
where
    F: FnMut(&str) -> Result<(), ScriptFailure>,
{
    fn execute(&mut self, script: &str) -> Result<(), ScriptFailure> {
        self(script)
    }
}

/// A callback that runs exactly once on the host thread.
pub type HostJob = Box<dyn FnOnce(&mut dyn ScriptEngine) + Send + 'static>;

/// The one capability the live-link needs from its host.
pub trait HostScheduler: Send + Sync {
    /// Schedule `job` to run once, at some future point, on the host thread.
    ///
    /// There is no guarantee on timing, and no guarantee the job runs at all
    /// if the host shuts down first.
    fn schedule_once(&self, job: HostJob);
}

impl<T: HostScheduler + ?Sized> HostScheduler for Arc<T> {
    fn schedule_once(&self, job: HostJob) {
        (**self).schedule_once(job);
    }
}

/// Create a cooperative host around `engine`.
pub fn cooperative<E: ScriptEngine>(engine: E) -> (HostHandle, HostLoop<E>) {
    let (tx, rx) = mpsc::channel();
    (
        HostHandle { tx },
        HostLoop {
            rx,
            engine,
            executed: 0,
        },
    )
}

/// Scheduling side of a cooperative host. Cheap to clone, usable from any thread.
#[derive(Clone)]
pub struct HostHandle {
    tx: mpsc::Sender<HostJob>,
}

impl HostScheduler for HostHandle {
    fn schedule_once(&self, job: HostJob) {
        if self.tx.send(job).is_err() {
            // Dropping the job drops its result sender; the waiter sees it as abandoned.
            tracing::debug!("Host loop is gone, dropping scheduled job");
        }
    }
}

/// Host-thread side of a cooperative host.
///
/// Runs queued jobs one at a time, in submission order, only when the owner
/// asks it to. Jobs still queued when the loop is dropped never run.
pub struct HostLoop<E> {
    rx: mpsc::Receiver<HostJob>,
    engine: E,
    executed: u64,
}

impl<E: ScriptEngine> HostLoop<E> {
    /// Run every job queued right now, without waiting. Returns how many ran.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        loop {
            match self.rx.try_recv() {
                Ok(job) => {
                    self.run(job);
                    ran += 1;
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return ran,
            }
        }
    }

    /// Wait up to `max_wait` for a job, then drain the queue.
    ///
    /// Returns the number of jobs run, or `None` once every [`HostHandle`]
    /// has been dropped and the queue is empty.
    pub fn pump(&mut self, max_wait: Duration) -> Option<usize> {
        match self.rx.recv_timeout(max_wait) {
            Ok(job) => {
                self.run(job);
                Some(1 + self.run_pending())
            }
            Err(RecvTimeoutError::Timeout) => Some(0),
            Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Block, running jobs as they arrive, until every handle is dropped.
    pub fn run_until_closed(&mut self) {
        while let Ok(job) = self.rx.recv() {
            self.run(job);
        }
    }

    /// Total number of jobs this loop has run.
    pub fn executed(&self) -> u64 {
        self.executed
    }

    /// Get a reference to the engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Get a mutable reference to the engine.
    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    fn run(&mut self, job: HostJob) {
        job(&mut self.engine);
        self.executed += 1;
    }
}
