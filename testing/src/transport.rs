//! Scripted transport.

use courier_core::transport::{RequestConfig, Response, Transport, TransportError, TransportFuture};
use futures::channel::oneshot;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// What a scripted or hand-resolved call answers with.
pub type Reply = Result<Response, TransportError>;

#[derive(Default)]
struct MockState {
    calls: Vec<RequestConfig>,
    script: VecDeque<Reply>,
    fallback: Option<Reply>,
    pending: Vec<(usize, oneshot::Sender<Reply>)>,
}

/// A [`Transport`] whose replies are scripted or resolved by hand.
///
/// Each call first consumes the next scripted reply, then falls back to the
/// reply set with [`always`](Self::always). With neither, the call stays
/// pending until the test resolves it, which is how tests control completion
/// order across several requests.
///
/// Every call is recorded with its resolved [`RequestConfig`].
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Transport that leaves every call pending.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport that answers every unscripted call with `reply`.
    #[must_use]
    pub fn always(reply: Reply) -> Self {
        let transport = Self::new();
        transport.lock().fallback = Some(reply);
        transport
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a reply for the next unanswered call.
    pub fn reply(&self, reply: Reply) -> &Self {
        self.lock().script.push_back(reply);
        self
    }

    /// Resolve the pending call with index `call` (0-based, in call order).
    ///
    /// Returns `false` when that call is not pending or its attempt was aborted.
    pub fn resolve(&self, call: usize, reply: Reply) -> bool {
        let sender = {
            let mut state = self.lock();
            let position = state.pending.iter().position(|(index, _)| *index == call);
            position.map(|position| state.pending.remove(position).1)
        };
        sender.is_some_and(|sender| sender.send(reply).is_ok())
    }

    /// Resolve the oldest pending call whose attempt is still live.
    pub fn resolve_next(&self, reply: Reply) -> bool {
        let sender = {
            let mut state = self.lock();
            state.pending.retain(|(_, sender)| !sender.is_canceled());
            (!state.pending.is_empty()).then(|| state.pending.remove(0).1)
        };
        sender.is_some_and(|sender| sender.send(reply).is_ok())
    }

    /// Every request seen so far.
    #[must_use]
    pub fn calls(&self) -> Vec<RequestConfig> {
        self.lock().calls.clone()
    }

    /// Number of requests seen so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    /// Indices of calls still waiting for a hand-written reply.
    #[must_use]
    pub fn pending(&self) -> Vec<usize> {
        self.lock()
            .pending
            .iter()
            .filter(|(_, sender)| !sender.is_canceled())
            .map(|(index, _)| *index)
            .collect()
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MockTransport")
            .field("calls", &state.calls.len())
            .field("scripted", &state.script.len())
            .field("pending", &state.pending.len())
            .finish()
    }
}

impl Transport for MockTransport {
    fn request(&self, config: RequestConfig) -> TransportFuture {
        let mut state = self.lock();
        let index = state.calls.len();
        tracing::debug!(call = index, endpoint = %config.endpoint(), "Mock transport called");
        state.calls.push(config);

        if let Some(reply) = state.script.pop_front().or_else(|| state.fallback.clone()) {
            return Box::pin(futures::future::ready(reply));
        }

        let (tx, rx) = oneshot::channel();
        state.pending.push((index, tx));
        Box::pin(async move { rx.await.unwrap_or(Err(TransportError::Cancelled)) })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use courier_core::config::Method;
    use futures::executor::block_on;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn request(id: u64) -> RequestConfig {
        RequestConfig {
            base_url: "/api".into(),
            url: Some(format!("/{id}")),
            method: Method::Get,
            headers: BTreeMap::new(),
            params: BTreeMap::new(),
            body: None,
            timeout: None,
            cancelable: true,
            request_id: id,
        }
    }

    #[test]
    fn test_script_then_fallback() {
        let transport = MockTransport::always(Ok(Response::ok(json!("fallback"))));
        transport.reply(Err(TransportError::Network("down".into())));

        assert!(block_on(transport.request(request(1))).is_err());
        assert_eq!(block_on(transport.request(request(2))).unwrap().body, json!("fallback"));
        assert_eq!(transport.call_count(), 2);
        assert_eq!(transport.calls()[1].request_id, 2);
    }

    #[test]
    fn test_manual_resolution_out_of_order() {
        let transport = MockTransport::new();
        let first = transport.request(request(1));
        let second = transport.request(request(2));
        assert_eq!(transport.pending(), vec![0, 1]);

        assert!(transport.resolve(1, Ok(Response::ok(json!(2)))));
        assert_eq!(block_on(second).unwrap().body, json!(2));
        assert!(transport.resolve_next(Ok(Response::ok(json!(1)))));
        assert_eq!(block_on(first).unwrap().body, json!(1));
        assert!(!transport.resolve_next(Ok(Response::ok(json!(3)))));
    }

    #[test]
    fn test_dropped_call_cannot_be_resolved() {
        let transport = MockTransport::new();
        drop(transport.request(request(1)));

        assert!(transport.pending().is_empty());
        assert!(!transport.resolve(0, Ok(Response::ok(json!(null)))));
    }
}
