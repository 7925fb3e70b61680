//! Chain event recorder.

use courier_core::processor::Chain;
use courier_core::transport::{Outcome, Response, TransportError};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};

/// One processor invocation seen by an [`EventLog`].
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// `loading(status)`
    Loading(bool),
    /// `success(value)`
    Success(Value),
    /// `error(response)`
    Error(Response),
    /// `transport_error(error)`
    TransportError(TransportError),
    /// `finally(outcome)`
    Finally(Outcome),
}

impl Event {
    /// Short name of the event, e.g. `"loading(false)"` or `"success"`.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Loading(true) => "loading(true)",
            Self::Loading(false) => "loading(false)",
            Self::Success(_) => "success",
            Self::Error(_) => "error",
            Self::TransportError(_) => "transport_error",
            Self::Finally(_) => "finally",
        }
    }
}

/// Records every event a chain emits, in emission order.
///
/// ```
/// use courier_core::processor::Chain;
/// use courier_testing::EventLog;
///
/// let log = EventLog::new();
/// let chain = log.attach(Chain::new());
///
/// chain.emit_loading(false);
/// assert_eq!(log.names(), vec!["loading(true)", "loading(false)"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<Event>>>,
}

impl EventLog {
    /// Empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, event: Event) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    /// Attach one processor per event to `chain`.
    ///
    /// The loading processor records the `loading(true)` signal it receives on
    /// registration.
    #[must_use]
    pub fn attach(&self, chain: Chain) -> Chain {
        let (loading, success, error, transport_error, finally) =
            (self.clone(), self.clone(), self.clone(), self.clone(), self.clone());
        chain
            .loading(move |status| loading.record(Event::Loading(status)))
            .success(move |value| success.record(Event::Success(value.clone())))
            .error(move |response| error.record(Event::Error(response.clone())))
            .transport_error(move |e| transport_error.record(Event::TransportError(e.clone())))
            .finally(move |outcome, _| finally.record(Event::Finally(outcome.clone())))
    }

    /// Every event recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Names of every event recorded so far.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(Event::name).collect()
    }

    /// How many recorded events have the given name.
    #[must_use]
    pub fn count(&self, name: &str) -> usize {
        self.events().iter().filter(|e| e.name() == name).count()
    }

    /// Values passed to `success`, in order.
    #[must_use]
    pub fn successes(&self) -> Vec<Value> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Success(value) => Some(value),
                _ => None,
            })
            .collect()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
