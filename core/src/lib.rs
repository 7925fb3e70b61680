//! # Courier Core
//!
//! Core types for Courier, a client-side request orchestration engine.
//!
//! This crate holds the data model and the pure logic: configuration layers and
//! their resolution, the processor chain, retry rule types, and the capability
//! traits the runtime is injected with. It holds no process state.
//!
//! ## Core Concepts
//!
//! - **Layer**: one of global, module or call-site configuration, static or produced on demand
//! - **Resolution**: merging the three layers into one [`ResolvedConfig`]
//! - **Processor**: a callback for one lifecycle event (loading, success, error, transport error, finally)
//! - **Chain**: the fluent handle processors are attached through
//! - **Capabilities**: [`Transport`], [`CacheStore`] and [`Scheduler`], injected by the runtime
//!
//! ## Example
//!
//! ```
//! use courier_core::config::{BehaviorConfig, LayerConfig, TransportConfig};
//! use courier_core::resolver::ConfigResolver;
//!
//! let global = LayerConfig::transport(TransportConfig::new().base_url("/api").header("x-app", "demo"));
//! let resolver = ConfigResolver::new(
//!     LayerConfig::transport(TransportConfig::new().base_url("/users")),
//!     LayerConfig::new(TransportConfig::new().url("/42"), BehaviorConfig::new().cancelable(false)),
//! );
//!
//! let resolved = resolver.resolve(&global);
//! assert_eq!(resolved.request.endpoint(), "/api/users/42");
//! assert!(!resolved.request.cancelable);
//! ```

pub use serde_json::Value;

/// Cache capability and descriptors.
pub mod cache;

/// Configuration fragments, layers and value-or-producer sources.
pub mod config;

/// Processor chain and dispatch semantics.
pub mod processor;

/// Three-layer configuration resolution.
pub mod resolver;

/// Retry rule types.
pub mod retry;

/// Scheduling capability.
pub mod scheduler;

/// Transport capability, responses and outcomes.
pub mod transport;

pub use cache::{CacheDescriptor, CacheStore, StorageClass};
pub use config::{
    BehaviorConfig, Body, ConfigSource, Extractor, LayerConfig, LayerSnapshot, Method, Predicate,
    TransportConfig,
};
pub use processor::{Chain, Flow, IntoFlow, WeakChain};
pub use resolver::{ConfigResolver, ResolvedConfig, path_join};
pub use retry::{BeforeRetry, RetryRule, RetryScope, RetryWhen};
pub use scheduler::Scheduler;
pub use transport::{
    Outcome, RequestConfig, Response, Transport, TransportError, TransportFuture,
    UnconfiguredTransport,
};
