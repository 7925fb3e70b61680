//! Scheduling capability.
//!
//! The engine never calls a runtime directly. Transport futures, retry gates
//! and the one-tick deferrals of the cache path all go through a [`Scheduler`],
//! so a test can swap in a manual executor and step through events one tick at
//! a time.

use futures::future::BoxFuture;
use futures::task::SpawnError;

/// Deferred synchronous work.
pub type Deferred = Box<dyn FnOnce() + Send + 'static>;

/// Runs engine work outside of the caller's stack.
///
/// # Implementations
///
/// - `TokioScheduler` (in `courier-runtime`) - spawns onto the ambient tokio runtime
/// - `ManualScheduler` (in `courier-testing`) - queues tasks until the test steps them
pub trait Scheduler: Send + Sync {
    /// Drive `task` to completion in the background.
    ///
    /// # Errors
    ///
    /// Returns [`SpawnError`] when no executor can take the task. The task is
    /// dropped without being polled.
    fn spawn(&self, task: BoxFuture<'static, ()>) -> Result<(), SpawnError>;

    /// Run `f` on a later tick, after the current caller has returned.
    ///
    /// # Errors
    ///
    /// Same as [`spawn`](Self::spawn).
    fn defer(&self, f: Deferred) -> Result<(), SpawnError> {
        self.spawn(Box::pin(async move { f() }))
    }
}
