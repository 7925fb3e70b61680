//! Future and state-mirror adapters over a chain.

use crate::error::ChainError;
use courier_core::processor::Chain;
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{oneshot, watch};

/// Resolve with the chain's first success, or fail with its first error.
///
/// A cancelled request neither resolves nor fails: the future stays pending,
/// so callers that need a deadline should wrap it in a timeout.
///
/// ```no_run
/// # async fn example(chain: courier_core::processor::Chain) {
/// match courier_runtime::to_promise(chain).await {
///     Ok(user) => println!("{user}"),
///     Err(error) => eprintln!("{error}"),
/// }
/// # }
/// ```
pub fn to_promise(chain: Chain) -> impl Future<Output = Result<Value, ChainError>> + Send + 'static {
    let (tx, rx) = oneshot::channel();
    let slot = Arc::new(Mutex::new(Some(tx)));

    let settle = move |result: Result<Value, ChainError>| {
        let sender = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(sender) = sender {
            let _ = sender.send(result);
        }
    };
    let (on_success, on_error, on_transport_error) = (settle.clone(), settle.clone(), settle);

    let _ = chain
        .success(move |value| on_success(Ok(value.clone())))
        .error(move |response| on_error(Err(ChainError::Business(response.clone()))))
        .transport_error(move |error| on_transport_error(Err(ChainError::Transport(error.clone()))));

    async move {
        match rx.await {
            Ok(result) => result,
            Err(_) => std::future::pending().await,
        }
    }
}

/// Snapshot of a request mirrored from its chain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestState {
    /// Whether the request is running
    pub loading: bool,
    /// Latest success value
    pub data: Option<Value>,
    /// Latest failure
    pub error: Option<ChainError>,
}

/// Mirror a chain into a [`watch`] channel.
///
/// The receiver starts with `loading: true` (the registration signal) and is
/// updated on every loading, success and failure event. A success clears any
/// earlier error and a failure keeps the last data, so retries that end in
/// success read cleanly.
pub fn watch_state(chain: Chain) -> watch::Receiver<RequestState> {
    let (tx, rx) = watch::channel(RequestState::default());
    let tx = Arc::new(tx);
    let (on_loading, on_success, on_error, on_transport_error) =
        (Arc::clone(&tx), Arc::clone(&tx), Arc::clone(&tx), tx);

    let _ = chain
        .loading(move |loading| on_loading.send_modify(|state| state.loading = loading))
        .success(move |value| {
            on_success.send_modify(|state| {
                state.data = Some(value.clone());
                state.error = None;
            });
        })
        .error(move |response| {
            on_error.send_modify(|state| state.error = Some(ChainError::Business(response.clone())));
        })
        .transport_error(move |error| {
            on_transport_error
                .send_modify(|state| state.error = Some(ChainError::Transport(error.clone())));
        });

    rx
}
