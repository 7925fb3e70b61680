//! # Courier Runtime
//!
//! Runtime for Courier, a client-side request orchestration engine.
//!
//! This crate turns the pure types of `courier-core` into running requests:
//! it owns the global configuration layer, hands out modules, drives each
//! call through cache or transport, and coordinates retries across calls.
//!
//! ## Core Components
//!
//! - **Courier**: the engine (global layer, injected capabilities, in-flight registry, retry queue)
//! - **Module**: a bound module layer; calling it orchestrates one request and returns its chain
//! - **Orchestrator**: the per-call state machine (cache replay, transport, predicate, retry hand-off)
//! - **Retry coordinator**: abort-then-reissue across one instance, one module or the whole engine
//! - **Combinators**: [`race`] and [`all`] over chains
//! - **Adapters**: [`to_promise`] and [`watch_state`]
//!
//! ## Example
//!
//! ```no_run
//! use courier_core::config::{BehaviorConfig, LayerConfig, TransportConfig};
//!
//! # async fn example() {
//! courier_runtime::set_global_config(LayerConfig::transport(
//!     TransportConfig::new().base_url("https://api.example.com"),
//! ));
//!
//! let users = courier_runtime::create_module(LayerConfig::new(
//!     TransportConfig::new().base_url("/users"),
//!     BehaviorConfig::new().error(|response| eprintln!("rejected: {}", response.status)),
//! ));
//!
//! let chain = users
//!     .request(TransportConfig::new().url("/42"))
//!     .loading(|on| println!("loading: {on}"));
//!
//! let user = courier_runtime::to_promise(chain).await;
//! # }
//! ```

use courier_core::config::LayerConfig;
use courier_core::processor::Chain;
use std::sync::LazyLock;

/// In-process cache store
pub mod cache;

/// `race` and `all` combinators
pub mod combinators;

/// The engine and module factory
pub mod engine;

/// Prometheus metrics for observability
pub mod metrics;

/// Future and state-mirror adapters
pub mod promise;

/// Tokio-backed scheduler
pub mod scheduler;

mod orchestrator;
mod registry;
mod retry;

pub use cache::InMemoryCache;
pub use engine::{Courier, CourierBuilder, Module, ModuleId};
pub use error::{ChainError, CourierError};
pub use promise::{RequestState, to_promise, watch_state};
pub use scheduler::TokioScheduler;

/// Error types for the runtime
pub mod error {
    use courier_core::transport::{Response, TransportError};
    use thiserror::Error;

    /// Errors from engine setup.
    #[derive(Error, Debug)]
    pub enum CourierError {
        /// A configuration document could not be parsed
        #[error("Invalid configuration: {0}")]
        Config(#[from] serde_json::Error),

        /// The metrics exporter could not be installed
        #[error(transparent)]
        Metrics(#[from] crate::metrics::MetricsError),
    }

    /// Why a chain ended without a success.
    ///
    /// Cancellation is deliberately absent: a cancelled request is not a failure.
    #[derive(Error, Debug, Clone, PartialEq)]
    pub enum ChainError {
        /// The transport answered but the predicate rejected the response
        #[error("Business error (status {})", .0.status)]
        Business(Response),

        /// The transport failed
        #[error(transparent)]
        Transport(#[from] TransportError),
    }
}

static DEFAULT_ENGINE: LazyLock<Courier> = LazyLock::new(Courier::new);

/// The process-wide engine used by the free functions of this crate.
#[must_use]
pub fn global() -> &'static Courier {
    &DEFAULT_ENGINE
}

/// Replace the global layer of the process-wide engine.
pub fn set_global_config(layer: LayerConfig) {
    global().set_global_config(layer);
}

/// Reset the global layer of the process-wide engine to empty.
pub fn reset_global_config() {
    global().reset_global_config();
}

/// Create a module on the process-wide engine.
#[must_use]
pub fn create_module(layer: LayerConfig) -> Module {
    global().create_module(layer)
}

/// [`combinators::race`] on the process-wide engine.
#[must_use]
pub fn race(chains: impl IntoIterator<Item = Chain>) -> Chain {
    global().race(chains)
}

/// [`combinators::all`] on the process-wide engine.
#[must_use]
pub fn all(chains: impl IntoIterator<Item = Chain>) -> Chain {
    global().all(chains)
}
