//! Per-call request orchestration.
//!
//! One [`Orchestrator`] exists per module call. It owns the call's resolver and
//! chain and drives one attempt at a time:
//!
//! ```text
//! idle ─► pending ─┬─► cache replay ──────────────► done (cached)
//!                  └─► transport ─┬─► success / business error / transport error ─► done
//!                                 ├─► cancelled ─────────────────────────────────► done
//!                                 └─► retrying ─► pending (reissued) | done (discarded)
//! ```
//!
//! Every attempt gets a fresh request id and abort handle. A completion whose
//! request id is no longer current, or that arrives while the instance is
//! staged for retry, is discarded.
//!
//! Each attempt is bracketed by `loading(true)` and `loading(false)`. The
//! transport settling emits `loading(false)` before any retry decision; a
//! reissued attempt signals `loading(true)` again. Siblings swept into someone
//! else's retry get `loading(false)` and `finally(Cancelled)` when they are
//! staged.

use crate::engine::{Engine, ModuleId};
use crate::metrics::{OutcomeLabel, RequestMetrics};
use crate::scheduler::yield_now;
use courier_core::processor::Chain;
use courier_core::resolver::{ConfigResolver, ResolvedConfig};
use courier_core::retry::{BeforeRetry, RetryScope};
use courier_core::transport::{Outcome, RequestConfig, Response, Transport, TransportError};
use futures::future::{AbortHandle, Abortable, Aborted};
use futures::task::SpawnError;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Idle,
    Pending,
    Retrying,
    Done,
}

#[derive(Default)]
struct Attempt {
    phase: Phase,
    request_id: u64,
    abort: Option<AbortHandle>,
    retries: u32,
    abandoned: bool,
    interrupted: bool,
    cancelable: bool,
    request: Option<RequestConfig>,
}

pub(crate) struct Orchestrator {
    engine: Arc<Engine>,
    module: ModuleId,
    resolver: ConfigResolver,
    chain: Chain,
    attempt: Mutex<Attempt>,
}

impl Orchestrator {
    /// Build an instance, dispatch its first attempt and hand back its chain.
    pub(crate) fn start(engine: &Arc<Engine>, module: ModuleId, resolver: ConfigResolver) -> Chain {
        let resolved = resolver.resolve(&engine.global_layer());
        let chain = resolved.chain();

        let instance = Arc::new(Self {
            engine: Arc::clone(engine),
            module,
            resolver,
            chain: chain.clone(),
            attempt: Mutex::default(),
        });

        let weak = Arc::downgrade(&instance);
        chain.on_abort(move || {
            if let Some(instance) = weak.upgrade() {
                instance.abort();
            }
        });

        instance.dispatch(resolved, false);
        chain
    }

    fn lock(&self) -> MutexGuard<'_, Attempt> {
        self.attempt.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) const fn module(&self) -> ModuleId {
        self.module
    }

    pub(crate) fn is_cancelable(&self) -> bool {
        self.lock().cancelable
    }

    fn dispatch(self: &Arc<Self>, resolved: ResolvedConfig, restart: bool) {
        let request_id = self.engine.next_request_id();
        let (handle, registration) = AbortHandle::new_pair();
        let request = RequestConfig {
            request_id,
            ..resolved.request.clone()
        };

        {
            let mut attempt = self.lock();
            if attempt.abandoned {
                drop(attempt);
                self.discard();
                return;
            }
            attempt.phase = Phase::Pending;
            attempt.request_id = request_id;
            attempt.abort = Some(handle);
            attempt.interrupted = false;
            attempt.cancelable = request.cancelable;
            attempt.request = Some(request.clone());
        }

        if restart {
            self.chain.emit_loading(true);
        }

        RequestMetrics::record_request();
        tracing::debug!(
            request_id,
            module = %self.module,
            method = %request.method,
            endpoint = %request.endpoint(),
            "Dispatching request"
        );

        let this = Arc::clone(self);

        if let Some(value) = self.cached(&resolved) {
            let gate = Abortable::new(futures::future::ready(()), registration);
            let replay = request.clone();
            let scheduled = self.engine.scheduler.spawn(Box::pin(async move {
                match gate.await {
                    Ok(()) => this.replay_cached(request_id, value, replay).await,
                    Err(Aborted) => {
                        if this.claim(request_id).is_some() {
                            this.finish_cancelled(Some(&replay));
                        }
                    },
                }
            }));
            if let Err(error) = scheduled {
                self.unscheduled(request_id, &error, &request);
            }
            return;
        }

        self.engine.in_flight.insert(request_id, Arc::clone(self));
        let transport = resolved
            .transport
            .clone()
            .unwrap_or_else(|| self.engine.transport());
        let call = Abortable::new(transport.request(request.clone()), registration);
        let started = Instant::now();
        let settled = request.clone();

        let scheduled = self.engine.scheduler.spawn(Box::pin(async move {
            let result = call.await;
            RequestMetrics::record_transport_duration(started.elapsed());
            this.settle(request_id, result, &resolved, &settled, transport.as_ref());
        }));
        if let Err(error) = scheduled {
            self.unscheduled(request_id, &error, &request);
        }
    }

    /// End an attempt whose task the scheduler refused.
    fn unscheduled(&self, request_id: u64, error: &SpawnError, request: &RequestConfig) {
        if self.claim(request_id).is_none() {
            return;
        }
        self.engine.in_flight.remove(request_id);
        tracing::error!(request_id, module = %self.module, error = %error, "Request could not be scheduled");

        let error = TransportError::Unscheduled(error.to_string());
        self.chain.emit_loading(false);
        self.chain.emit_transport_error(&error);
        self.chain.emit_finally(&Outcome::Failed(error), Some(request));
        RequestMetrics::record_outcome(OutcomeLabel::TransportError);
    }

    fn cached(&self, resolved: &ResolvedConfig) -> Option<Value> {
        let descriptor = resolved.cache.as_ref()?;
        let cache = self.engine.cache();
        if cache.has(descriptor.storage_class, &descriptor.key) {
            cache.get(descriptor.storage_class, &descriptor.key)
        } else {
            None
        }
    }

    /// Take ownership of the outcome of `request_id`.
    ///
    /// Returns the retries spent so far, or `None` when the completion is stale.
    fn claim(&self, request_id: u64) -> Option<u32> {
        let mut attempt = self.lock();
        if attempt.request_id != request_id || attempt.phase != Phase::Pending {
            return None;
        }
        attempt.phase = Phase::Done;
        attempt.abort = None;
        Some(attempt.retries)
    }

    async fn replay_cached(self: Arc<Self>, request_id: u64, value: Value, request: RequestConfig) {
        if self.claim(request_id).is_none() {
            return;
        }
        RequestMetrics::record_cache_hit();
        tracing::debug!(request_id, module = %self.module, "Serving request from cache");

        self.chain.emit_loading(false);
        yield_now().await;
        self.chain.emit_success(&value);
        yield_now().await;
        self.chain.emit_finally(&Outcome::Cached(value), Some(&request));
        RequestMetrics::record_outcome(OutcomeLabel::Cached);
    }

    fn settle(
        self: &Arc<Self>,
        request_id: u64,
        result: Result<Result<Response, TransportError>, Aborted>,
        resolved: &ResolvedConfig,
        request: &RequestConfig,
        transport: &dyn Transport,
    ) {
        let Some(retries) = self.claim(request_id) else {
            tracing::debug!(request_id, module = %self.module, "Discarding stale completion");
            return;
        };
        self.engine.in_flight.remove(request_id);

        match result {
            Err(Aborted) => self.finish_cancelled(Some(request)),
            Ok(Err(error)) if transport.is_cancellation(&error) => self.finish_cancelled(Some(request)),
            Ok(Ok(response)) => self.on_response(response, retries, resolved, request),
            Ok(Err(error)) => self.on_transport_error(error, retries, resolved, request),
        }
    }

    fn on_response(
        self: &Arc<Self>,
        response: Response,
        retries: u32,
        resolved: &ResolvedConfig,
        request: &RequestConfig,
    ) {
        self.chain.emit_loading(false);

        let retry = resolved
            .retry_when
            .as_ref()
            .and_then(|when| when.on_success.as_ref())
            .filter(|rule| rule.should_retry(&response, retries));
        if let Some(rule) = retry {
            self.hand_off(rule.scope(), rule.before_retry().cloned());
            return;
        }

        let extracted = if resolved.is_success(&response) {
            resolved.extract(&response)
        } else {
            None
        };

        if let Some(value) = extracted {
            tracing::debug!(request_id = request.request_id, status = response.status, "Request succeeded");
            self.chain.emit_success(&value);
            self.chain.emit_finally(&Outcome::Response(response), Some(request));
            if let Some(cache) = &resolved.cache {
                self.engine.cache().set(cache.storage_class, &cache.key, value);
            }
            RequestMetrics::record_outcome(OutcomeLabel::Success);
        } else {
            tracing::debug!(request_id = request.request_id, status = response.status, "Business error");
            self.chain.emit_error(&response);
            self.chain.emit_finally(&Outcome::Response(response), Some(request));
            RequestMetrics::record_outcome(OutcomeLabel::BusinessError);
        }
    }

    fn on_transport_error(
        self: &Arc<Self>,
        error: TransportError,
        retries: u32,
        resolved: &ResolvedConfig,
        request: &RequestConfig,
    ) {
        self.chain.emit_loading(false);

        let retry = resolved
            .retry_when
            .as_ref()
            .and_then(|when| when.on_error.as_ref())
            .filter(|rule| rule.should_retry(&error, retries));
        if let Some(rule) = retry {
            self.hand_off(rule.scope(), rule.before_retry().cloned());
            return;
        }

        tracing::debug!(request_id = request.request_id, error = %error, "Transport error");
        self.chain.emit_transport_error(&error);
        self.chain.emit_finally(&Outcome::Failed(error), Some(request));
        RequestMetrics::record_outcome(OutcomeLabel::TransportError);
    }

    fn hand_off(self: &Arc<Self>, scope: RetryScope, gate: Option<BeforeRetry>) {
        let retries = {
            let mut attempt = self.lock();
            attempt.retries += 1;
            attempt.retries
        };
        tracing::debug!(module = %self.module, retries, scope = %scope, "Retry rule fired");
        self.engine.retries.start(&self.engine, self, scope, gate);
    }

    /// Stage this instance for retry, aborting its live attempt.
    ///
    /// Returns the request id of the attempt being replaced, or `None` when the
    /// instance is already staged, was abandoned by its caller, or (unless it
    /// is the trigger) has already settled.
    pub(crate) fn mark_retrying(&self, trigger: bool) -> Option<u64> {
        let mut attempt = self.lock();
        let eligible = match attempt.phase {
            Phase::Pending => trigger || !attempt.abandoned,
            Phase::Done => trigger,
            Phase::Idle | Phase::Retrying => false,
        };
        if !eligible {
            return None;
        }
        attempt.phase = Phase::Retrying;
        if let Some(handle) = attempt.abort.take() {
            handle.abort();
        }
        Some(attempt.request_id)
    }

    /// Tell a swept sibling's chain that its attempt was cancelled for a retry.
    ///
    /// A no-op unless the instance is still staged.
    pub(crate) fn interrupt(&self) {
        let request = {
            let mut attempt = self.lock();
            if attempt.phase != Phase::Retrying || attempt.interrupted {
                return;
            }
            attempt.interrupted = true;
            attempt.request.clone()
        };
        tracing::debug!(module = %self.module, "Request interrupted for retry");
        self.chain.emit_interrupted(request.as_ref());
    }

    /// Run a new attempt after a coordinated retry.
    pub(crate) fn reissue(self: &Arc<Self>) {
        let resolved = self.resolver.resolve(&self.engine.global_layer());
        self.dispatch(resolved, true);
    }

    /// End a staged or abandoned instance as cancelled without reissuing it.
    ///
    /// Staged instances have already signalled `loading(false)`; a sibling
    /// that was interrupted has also run its finally processors, so only the
    /// settle hooks remain.
    pub(crate) fn discard(&self) {
        let (request, interrupted) = {
            let mut attempt = self.lock();
            attempt.phase = Phase::Done;
            attempt.abort = None;
            (attempt.request.clone(), std::mem::take(&mut attempt.interrupted))
        };
        tracing::debug!(module = %self.module, "Queued request discarded");
        if interrupted {
            self.chain.emit_settled(&Outcome::Cancelled);
        } else {
            self.chain.emit_finally(&Outcome::Cancelled, request.as_ref());
        }
        RequestMetrics::record_outcome(OutcomeLabel::Cancelled);
    }

    /// Abort the live attempt. Idempotent.
    pub(crate) fn abort(&self) {
        let mut attempt = self.lock();
        attempt.abandoned = true;
        if let Some(handle) = attempt.abort.take() {
            tracing::debug!(request_id = attempt.request_id, module = %self.module, "Aborting request");
            handle.abort();
        }
    }

    fn finish_cancelled(&self, request: Option<&RequestConfig>) {
        tracing::debug!(module = %self.module, "Request cancelled");
        self.chain.emit_loading(false);
        self.chain.emit_finally(&Outcome::Cancelled, request);
        RequestMetrics::record_outcome(OutcomeLabel::Cancelled);
    }
}
