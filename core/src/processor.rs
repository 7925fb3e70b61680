//! Processor chain: ordered lifecycle callbacks with short-circuit semantics.
//!
//! A [`Chain`] holds five processor lists (loading, success, business error,
//! transport error, finally). Processors from configuration layers are loaded
//! first (global, module, call-site); processors attached through the chain
//! handle are appended after them.
//!
//! # Dispatch rules
//!
//! - Processors of one event run in reverse registration order (last attached runs first).
//! - A processor returning [`Flow::Stop`] (or `false`) stops the remaining processors of that event.
//! - Processor errors and panics are logged and never stop the chain.
//! - `loading(false)` reaches every loading processor; it cannot be short-circuited.
//! - Registering a loading processor immediately calls it with `true`.
//! - Settle hooks ([`Chain::on_settled`]) run after the finally processors of a
//!   terminal outcome and are never short-circuited.
//!
//! # Example
//!
//! ```
//! use courier_core::processor::Chain;
//! use serde_json::json;
//! use std::sync::{Arc, Mutex};
//!
//! let order = Arc::new(Mutex::new(Vec::new()));
//! let (a, b, c) = (Arc::clone(&order), Arc::clone(&order), Arc::clone(&order));
//!
//! let chain = Chain::new()
//!     .success(move |_| a.lock().unwrap().push("a"))
//!     .success(move |_| { b.lock().unwrap().push("b"); false })
//!     .success(move |_| c.lock().unwrap().push("c"));
//!
//! chain.emit_success(&json!(1));
//! assert_eq!(*order.lock().unwrap(), vec!["c", "b"]);
//! ```

use crate::config::BehaviorConfig;
use crate::transport::{Outcome, RequestConfig, Response, TransportError};
use serde_json::Value;
use smallvec::SmallVec;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Whether dispatch continues to the next processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flow {
    /// Run the next processor
    #[default]
    Continue,
    /// Skip the remaining processors of this event
    Stop,
}

/// Conversion from a processor's return value into a [`Flow`].
///
/// `()` and `true` continue, `false` stops. A `Result` continues on `Err`
/// after logging the error.
pub trait IntoFlow {
    /// Convert into a flow decision.
    fn into_flow(self) -> Flow;
}

impl IntoFlow for Flow {
    fn into_flow(self) -> Flow {
        self
    }
}

impl IntoFlow for () {
    fn into_flow(self) -> Flow {
        Flow::Continue
    }
}

impl IntoFlow for bool {
    fn into_flow(self) -> Flow {
        if self { Flow::Continue } else { Flow::Stop }
    }
}

impl<T: IntoFlow, E: fmt::Display> IntoFlow for Result<T, E> {
    fn into_flow(self) -> Flow {
        match self {
            Ok(value) => value.into_flow(),
            Err(error) => {
                tracing::warn!(error = %error, "Processor returned an error, continuing chain");
                Flow::Continue
            },
        }
    }
}

/// Receives `true` when a request starts and `false` when it settles.
pub type LoadingProcessor = Arc<dyn Fn(bool) -> Flow + Send + Sync>;
/// Receives the extracted result.
pub type SuccessProcessor = Arc<dyn Fn(&Value) -> Flow + Send + Sync>;
/// Receives the raw response of a business error.
pub type ErrorProcessor = Arc<dyn Fn(&Response) -> Flow + Send + Sync>;
/// Receives the transport failure.
pub type TransportErrorProcessor = Arc<dyn Fn(&TransportError) -> Flow + Send + Sync>;
/// Receives the raw outcome and, for single requests, the resolved transport config.
pub type FinallyProcessor = Arc<dyn Fn(&Outcome, Option<&RequestConfig>) -> Flow + Send + Sync>;

/// Called when a chain is aborted.
pub type AbortHook = Arc<dyn Fn() + Send + Sync>;

/// Called once the chain reaches its terminal outcome.
pub type SettledHook = Arc<dyn Fn(&Outcome) + Send + Sync>;

pub(crate) fn wrap_loading<F, R>(f: F) -> LoadingProcessor
where
    F: Fn(bool) -> R + Send + Sync + 'static,
    R: IntoFlow,
{
    Arc::new(move |status| f(status).into_flow())
}

pub(crate) fn wrap_success<F, R>(f: F) -> SuccessProcessor
where
    F: Fn(&Value) -> R + Send + Sync + 'static,
    R: IntoFlow,
{
    Arc::new(move |value| f(value).into_flow())
}

pub(crate) fn wrap_error<F, R>(f: F) -> ErrorProcessor
where
    F: Fn(&Response) -> R + Send + Sync + 'static,
    R: IntoFlow,
{
    Arc::new(move |response| f(response).into_flow())
}

pub(crate) fn wrap_transport_error<F, R>(f: F) -> TransportErrorProcessor
where
    F: Fn(&TransportError) -> R + Send + Sync + 'static,
    R: IntoFlow,
{
    Arc::new(move |error| f(error).into_flow())
}

pub(crate) fn wrap_finally<F, R>(f: F) -> FinallyProcessor
where
    F: Fn(&Outcome, Option<&RequestConfig>) -> R + Send + Sync + 'static,
    R: IntoFlow,
{
    Arc::new(move |outcome, config| f(outcome, config).into_flow())
}

/// The five processor lists of one chain, in registration order.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    loading: SmallVec<[LoadingProcessor; 4]>,
    success: SmallVec<[SuccessProcessor; 4]>,
    error: SmallVec<[ErrorProcessor; 4]>,
    transport_error: SmallVec<[TransportErrorProcessor; 4]>,
    finally: SmallVec<[FinallyProcessor; 4]>,
}

impl ProcessorRegistry {
    /// Append every processor a behavior fragment defines.
    ///
    /// Returns the loading processor, if any, so the caller can signal it
    /// outside of any lock.
    pub fn load(&mut self, behavior: &BehaviorConfig) -> Option<LoadingProcessor> {
        if let Some(p) = &behavior.success {
            self.success.push(Arc::clone(p));
        }
        if let Some(p) = &behavior.error {
            self.error.push(Arc::clone(p));
        }
        if let Some(p) = &behavior.transport_error {
            self.transport_error.push(Arc::clone(p));
        }
        if let Some(p) = &behavior.finally {
            self.finally.push(Arc::clone(p));
        }
        behavior.loading.as_ref().map(|p| {
            self.loading.push(Arc::clone(p));
            Arc::clone(p)
        })
    }

    /// Number of registered processors, across all events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.loading.len()
            + self.success.len()
            + self.error.len()
            + self.transport_error.len()
            + self.finally.len()
    }

    /// Whether no processor is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("loading", &self.loading.len())
            .field("success", &self.success.len())
            .field("error", &self.error.len())
            .field("transport_error", &self.transport_error.len())
            .field("finally", &self.finally.len())
            .finish()
    }
}

#[derive(Default)]
struct ChainInner {
    processors: Mutex<ProcessorRegistry>,
    abort_hook: Mutex<Option<AbortHook>>,
    settled: Mutex<SmallVec<[SettledHook; 2]>>,
}

/// Fluent handle over a [`ProcessorRegistry`].
///
/// Cheap to clone; every clone points at the same lists. Registration methods
/// take and return the handle by value so calls can be chained directly on
/// the value returned by a request.
#[derive(Clone, Default)]
pub struct Chain {
    inner: Arc<ChainInner>,
}

impl Chain {
    /// Empty chain with no abort hook.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain pre-loaded from configuration layers, farthest layer first.
    ///
    /// Loading processors are signalled with `true` in load order.
    #[must_use]
    pub fn from_layers<'a>(layers: impl IntoIterator<Item = &'a BehaviorConfig>) -> Self {
        let chain = Self::new();
        let mut started = Vec::new();
        {
            let mut registry = chain.registry();
            for behavior in layers {
                started.extend(registry.load(behavior));
            }
        }
        for loading in started {
            guarded("loading", || loading(true));
        }
        chain
    }

    fn registry(&self) -> MutexGuard<'_, ProcessorRegistry> {
        self.inner
            .processors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach a loading processor and call it with `true` right away.
    #[must_use = "the chain handle is needed to attach further processors"]
    pub fn loading<F, R>(self, f: F) -> Self
    where
        F: Fn(bool) -> R + Send + Sync + 'static,
        R: IntoFlow,
    {
        let processor = wrap_loading(f);
        self.registry().loading.push(Arc::clone(&processor));
        guarded("loading", || processor(true));
        self
    }

    /// Attach a success processor.
    #[must_use = "the chain handle is needed to attach further processors"]
    pub fn success<F, R>(self, f: F) -> Self
    where
        F: Fn(&Value) -> R + Send + Sync + 'static,
        R: IntoFlow,
    {
        self.registry().success.push(wrap_success(f));
        self
    }

    /// Attach a business-error processor.
    #[must_use = "the chain handle is needed to attach further processors"]
    pub fn error<F, R>(self, f: F) -> Self
    where
        F: Fn(&Response) -> R + Send + Sync + 'static,
        R: IntoFlow,
    {
        self.registry().error.push(wrap_error(f));
        self
    }

    /// Attach a transport-error processor.
    #[must_use = "the chain handle is needed to attach further processors"]
    pub fn transport_error<F, R>(self, f: F) -> Self
    where
        F: Fn(&TransportError) -> R + Send + Sync + 'static,
        R: IntoFlow,
    {
        self.registry().transport_error.push(wrap_transport_error(f));
        self
    }

    /// Attach a finally processor.
    #[must_use = "the chain handle is needed to attach further processors"]
    pub fn finally<F, R>(self, f: F) -> Self
    where
        F: Fn(&Outcome, Option<&RequestConfig>) -> R + Send + Sync + 'static,
        R: IntoFlow,
    {
        self.registry().finally.push(wrap_finally(f));
        self
    }

    /// Abort whatever drives this chain. Idempotent; a no-op when nothing is wired.
    pub fn abort(&self) {
        let hook = self
            .inner
            .abort_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Wire the hook [`abort`](Self::abort) invokes, replacing any previous one.
    pub fn on_abort<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self
            .inner
            .abort_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(f));
    }

    /// Signal every loading processor. Never short-circuits.
    pub fn emit_loading(&self, status: bool) {
        let processors = self.registry().loading.clone();
        dispatch("loading", &processors, false, |p| p(status));
    }

    /// Run success processors.
    pub fn emit_success(&self, value: &Value) {
        let processors = self.registry().success.clone();
        dispatch("success", &processors, true, |p| p(value));
    }

    /// Run business-error processors.
    pub fn emit_error(&self, response: &Response) {
        let processors = self.registry().error.clone();
        dispatch("error", &processors, true, |p| p(response));
    }

    /// Run transport-error processors.
    pub fn emit_transport_error(&self, error: &TransportError) {
        let processors = self.registry().transport_error.clone();
        dispatch("transport_error", &processors, true, |p| p(error));
    }

    /// Run finally processors, then the settle hooks.
    pub fn emit_finally(&self, outcome: &Outcome, config: Option<&RequestConfig>) {
        let processors = self.registry().finally.clone();
        dispatch("finally", &processors, true, |p| p(outcome, config));
        self.emit_settled(outcome);
    }

    /// End an attempt that was cancelled to be retried.
    ///
    /// Loading processors get `false` and finally processors get
    /// [`Outcome::Cancelled`]. Settle hooks do not run; the chain goes on with
    /// the reissued attempt.
    pub fn emit_interrupted(&self, config: Option<&RequestConfig>) {
        self.emit_loading(false);
        let processors = self.registry().finally.clone();
        dispatch("finally", &processors, true, |p| p(&Outcome::Cancelled, config));
    }

    /// Run only the settle hooks.
    pub fn emit_settled(&self, outcome: &Outcome) {
        let hooks = self
            .inner
            .settled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for hook in &hooks {
            guarded("settled", || {
                hook(outcome);
                Flow::Continue
            });
        }
    }

    /// Observe the terminal outcome.
    ///
    /// Hooks run in registration order after every finally processor, whatever
    /// those return.
    pub fn on_settled<F>(&self, f: F)
    where
        F: Fn(&Outcome) + Send + Sync + 'static,
    {
        self.inner
            .settled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(f));
    }

    /// Snapshot of the registered processor counts.
    #[must_use]
    pub fn processors(&self) -> ProcessorRegistry {
        self.registry().clone()
    }

    /// Whether two handles point at the same chain.
    #[must_use]
    pub fn same_chain(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Handle that does not keep the chain alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakChain {
        WeakChain {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// Non-owning [`Chain`] handle.
#[derive(Clone, Default)]
pub struct WeakChain {
    inner: Weak<ChainInner>,
}

impl WeakChain {
    /// The chain, if any strong handle is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Chain> {
        self.inner.upgrade().map(|inner| Chain { inner })
    }
}

impl fmt::Debug for WeakChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakChain")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("processors", &*self.registry())
            .finish_non_exhaustive()
    }
}

fn dispatch<P>(event: &'static str, processors: &[P], short_circuit: bool, call: impl Fn(&P) -> Flow) {
    for processor in processors.iter().rev() {
        if guarded(event, || call(processor)) == Flow::Stop && short_circuit {
            tracing::debug!(event, "Processor chain short-circuited");
            break;
        }
    }
}

fn guarded(event: &'static str, f: impl FnOnce() -> Flow) -> Flow {
    catch_panic(event, f).unwrap_or(Flow::Continue)
}

/// Run user-supplied code, turning a panic into a logged `None`.
///
/// `callback` names the hook in the warning.
pub fn catch_panic<T>(callback: &'static str, f: impl FnOnce() -> T) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            tracing::warn!(callback, panic = %panic_message(payload.as_ref()), "User callback panicked");
            None
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic>")
}
