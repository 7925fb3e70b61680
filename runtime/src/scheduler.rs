//! Tokio-backed scheduler and the one-tick yield used by the cache path.

use courier_core::scheduler::Scheduler;
use futures::future::BoxFuture;
use futures::task::SpawnError;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::runtime::Handle;

/// Spawns engine work onto a tokio runtime.
///
/// Without an explicit handle, tasks go to the runtime current at spawn time.
/// Spawning outside of any runtime fails with [`SpawnError::shutdown`].
#[derive(Debug, Clone, Default)]
pub struct TokioScheduler {
    handle: Option<Handle>,
}

impl TokioScheduler {
    /// Scheduler bound to whichever runtime is current when work is spawned.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Scheduler bound to a specific runtime.
    #[must_use]
    pub const fn with_handle(handle: Handle) -> Self {
        Self {
            handle: Some(handle),
        }
    }
}

impl Scheduler for TokioScheduler {
    fn spawn(&self, task: BoxFuture<'static, ()>) -> Result<(), SpawnError> {
        let handle = self.handle.clone().or_else(|| Handle::try_current().ok());
        match handle {
            Some(handle) => {
                handle.spawn(task);
                Ok(())
            },
            None => {
                tracing::error!("No tokio runtime available, dropping engine task");
                Err(SpawnError::shutdown())
            },
        }
    }
}

/// Completes on the second poll, after re-queueing its task once.
#[derive(Debug, Default)]
pub(crate) struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Give up the rest of this tick.
pub(crate) fn yield_now() -> YieldNow {
    YieldNow::default()
}
