//! Coordinated retry with cross-instance cancellation.
//!
//! When an orchestrator's retry rule fires, the coordinator sweeps it (and,
//! depending on the rule's scope, every other in-flight orchestrator of the
//! same module or of the whole engine) into one queue. Each swept instance is
//! aborted and removed from the in-flight registry while the queue is locked,
//! so no other retry can observe it half-moved.
//!
//! The queue is then flushed: immediately when the rule has no gate, or once
//! the rule's `before_retry` hook resolves. A hook resolving to `Ok(true)`
//! reissues every queued instance; `Ok(false)`, `Err` or a panic discards
//! them, each ending as cancelled.

use crate::engine::Engine;
use crate::metrics::RequestMetrics;
use crate::orchestrator::Orchestrator;
use courier_core::retry::{BeforeRetry, RetryScope, open_gate};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Queue of orchestrators staged for reissue.
#[derive(Default)]
pub(crate) struct RetryCoordinator {
    queue: Mutex<Vec<Arc<Orchestrator>>>,
}

impl RetryCoordinator {
    fn lock(&self) -> MutexGuard<'_, Vec<Arc<Orchestrator>>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sweep `trigger` and its scope into the queue, then flush or gate.
    pub(crate) fn start(
        &self,
        engine: &Arc<Engine>,
        trigger: &Arc<Orchestrator>,
        scope: RetryScope,
        gate: Option<BeforeRetry>,
    ) {
        RequestMetrics::record_retry(scope);

        let (queued, swept) = {
            let mut queue = self.lock();
            Self::enqueue(engine, &mut queue, trigger, true);
            let others = match scope {
                RetryScope::Instance => Vec::new(),
                RetryScope::Module => engine.in_flight.by_module(trigger.module()),
                RetryScope::Global => engine.in_flight.all(),
            };
            let swept: Vec<_> = others
                .into_iter()
                .filter(|instance| Self::enqueue(engine, &mut queue, instance, false))
                .collect();
            (queue.len(), swept)
        };

        tracing::debug!(
            module = %trigger.module(),
            scope = %scope,
            queued,
            swept = swept.len(),
            "Retry queued"
        );

        for instance in &swept {
            instance.interrupt();
        }

        let Some(hook) = gate else {
            self.retry();
            return;
        };

        let gate = open_gate(&hook);
        let flush = Arc::clone(engine);
        let scheduled = engine.scheduler.spawn(Box::pin(async move {
            match gate.await {
                Ok(true) => flush.retries.retry(),
                Ok(false) => {
                    tracing::warn!("Retry gate declined, discarding queued requests");
                    flush.retries.clear();
                },
                Err(error) => {
                    tracing::warn!(error = %error, "Retry gate failed, discarding queued requests");
                    flush.retries.clear();
                },
            }
        }));
        if let Err(error) = scheduled {
            tracing::warn!(error = %error, "Retry gate could not be scheduled, discarding queued requests");
            self.clear();
        }
    }

    /// Abort `instance`, remove it from the registry and stage it.
    ///
    /// A no-op when the instance is already staged or, unless it is the
    /// trigger, has already settled. Returns whether it was staged.
    fn enqueue(
        engine: &Engine,
        queue: &mut Vec<Arc<Orchestrator>>,
        instance: &Arc<Orchestrator>,
        trigger: bool,
    ) -> bool {
        match instance.mark_retrying(trigger) {
            Some(request_id) => {
                engine.in_flight.remove(request_id);
                queue.push(Arc::clone(instance));
                true
            },
            None => false,
        }
    }

    /// Reissue every staged instance.
    pub(crate) fn retry(&self) {
        let queued = std::mem::take(&mut *self.lock());
        if !queued.is_empty() {
            tracing::debug!(count = queued.len(), "Reissuing queued requests");
        }
        for instance in queued {
            instance.reissue();
        }
    }

    /// Discard every staged instance, ending each as cancelled.
    pub(crate) fn clear(&self) {
        let queued = std::mem::take(&mut *self.lock());
        for instance in queued {
            instance.discard();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}
