//! The engine: global layer, injected capabilities and module factory.

use crate::cache::InMemoryCache;
use crate::combinators;
use crate::error::CourierError;
use crate::orchestrator::Orchestrator;
use crate::registry::InFlightRegistry;
use crate::retry::RetryCoordinator;
use crate::scheduler::TokioScheduler;
use courier_core::cache::CacheStore;
use courier_core::config::{BehaviorConfig, ConfigSource, LayerConfig, TransportConfig};
use courier_core::processor::Chain;
use courier_core::resolver::ConfigResolver;
use courier_core::scheduler::Scheduler;
use courier_core::transport::{Transport, UnconfiguredTransport};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Identifier assigned to each module, used to scope group retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(u64);

impl ModuleId {
    /// Raw value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module-{}", self.0)
    }
}

/// Shared engine state.
pub(crate) struct Engine {
    global: RwLock<LayerConfig>,
    transport: RwLock<Arc<dyn Transport>>,
    cache: RwLock<Arc<dyn CacheStore>>,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) in_flight: InFlightRegistry,
    pub(crate) retries: RetryCoordinator,
    next_module: AtomicU64,
    next_request: AtomicU64,
}

impl Engine {
    pub(crate) fn global_layer(&self) -> LayerConfig {
        self.global
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn transport(&self) -> Arc<dyn Transport> {
        self.transport.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn cache(&self) -> Arc<dyn CacheStore> {
        self.cache.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn next_request_id(&self) -> u64 {
        self.next_request.fetch_add(1, Ordering::Relaxed)
    }
}

/// A request orchestration engine.
///
/// Holds the global configuration layer, the injected transport, cache and
/// scheduler, the in-flight registry and the retry queue. Cheap to clone;
/// clones share all of it.
///
/// Most applications use the process-wide engine through the free functions
/// of this crate ([`crate::set_global_config`], [`crate::create_module`]).
/// Tests build their own so they never share state.
///
/// # Example
///
/// ```
/// use courier_core::config::{LayerConfig, TransportConfig};
/// use courier_runtime::Courier;
///
/// let courier = Courier::builder()
///     .global(LayerConfig::transport(TransportConfig::new().base_url("/api")))
///     .build();
///
/// let users = courier.create_module(LayerConfig::transport(TransportConfig::new().base_url("/users")));
/// assert_ne!(users.id(), courier.create_module(LayerConfig::default()).id());
/// ```
#[derive(Clone)]
pub struct Courier {
    engine: Arc<Engine>,
}

impl Courier {
    /// Engine with default capabilities: no transport, in-memory cache, tokio scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a new engine builder.
    #[must_use]
    pub fn builder() -> CourierBuilder {
        CourierBuilder::default()
    }

    /// Replace the global layer.
    pub fn set_global_config(&self, layer: LayerConfig) {
        *self.engine.global.write().unwrap_or_else(PoisonError::into_inner) = layer;
        tracing::debug!("Global configuration replaced");
    }

    /// Reset the global layer to empty.
    pub fn reset_global_config(&self) {
        self.set_global_config(LayerConfig::default());
    }

    /// Replace only the transport fragment of the global layer, parsed from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`CourierError::Config`] when the document is not a valid fragment.
    pub fn load_global_transport(&self, json: &str) -> Result<(), CourierError> {
        let transport = TransportConfig::from_json(json)?;
        let mut global = self.engine.global.write().unwrap_or_else(PoisonError::into_inner);
        global.transport = ConfigSource::from(transport);
        Ok(())
    }

    /// The current global layer.
    #[must_use]
    pub fn global_config(&self) -> LayerConfig {
        self.engine.global_layer()
    }

    /// Install the transport used when no layer overrides it.
    pub fn set_transport(&self, transport: Arc<dyn Transport>) {
        *self.engine.transport.write().unwrap_or_else(PoisonError::into_inner) = transport;
    }

    /// Install the cache store.
    pub fn set_cache(&self, cache: Arc<dyn CacheStore>) {
        *self.engine.cache.write().unwrap_or_else(PoisonError::into_inner) = cache;
    }

    /// Bind a module layer and assign it a fresh [`ModuleId`].
    #[must_use]
    pub fn create_module(&self, layer: LayerConfig) -> Module {
        let id = ModuleId(self.engine.next_module.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(module = %id, "Module created");
        Module {
            engine: Arc::clone(&self.engine),
            id,
            layer,
        }
    }

    /// Combine chains; the first success wins. See [`combinators::race`].
    #[must_use]
    pub fn race(&self, chains: impl IntoIterator<Item = Chain>) -> Chain {
        combinators::race(self.engine.scheduler.as_ref(), chains)
    }

    /// Combine chains; succeed once all succeed. See [`combinators::all`].
    #[must_use]
    pub fn all(&self, chains: impl IntoIterator<Item = Chain>) -> Chain {
        combinators::all(self.engine.scheduler.as_ref(), chains)
    }

    /// Abort every in-flight request whose resolved configuration is cancelable.
    ///
    /// Returns the number of requests aborted.
    pub fn cancel_all(&self) -> usize {
        let aborted = self
            .engine
            .in_flight
            .all()
            .into_iter()
            .filter(|instance| instance.is_cancelable())
            .inspect(|instance| instance.abort())
            .count();
        tracing::debug!(aborted, "Cancelled in-flight requests");
        aborted
    }

    /// Number of requests awaiting a transport outcome.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.engine.in_flight.len()
    }

    /// Number of requests staged for a gated retry.
    #[must_use]
    pub fn queued_retries(&self) -> usize {
        self.engine.retries.len()
    }
}

impl Default for Courier {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Courier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Courier")
            .field("in_flight", &self.in_flight_count())
            .field("queued_retries", &self.queued_retries())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Courier`].
#[derive(Default)]
pub struct CourierBuilder {
    global: Option<LayerConfig>,
    transport: Option<Arc<dyn Transport>>,
    cache: Option<Arc<dyn CacheStore>>,
    scheduler: Option<Arc<dyn Scheduler>>,
}

impl CourierBuilder {
    /// Set the initial global layer.
    #[must_use]
    pub fn global(mut self, layer: LayerConfig) -> Self {
        self.global = Some(layer);
        self
    }

    /// Set the transport.
    #[must_use]
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Set the cache store.
    #[must_use]
    pub fn cache(mut self, cache: impl CacheStore + 'static) -> Self {
        self.cache = Some(Arc::new(cache));
        self
    }

    /// Set the scheduler.
    #[must_use]
    pub fn scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
        self.scheduler = Some(Arc::new(scheduler));
        self
    }

    /// Build the [`Courier`].
    #[must_use]
    pub fn build(self) -> Courier {
        Courier {
            engine: Arc::new(Engine {
                global: RwLock::new(self.global.unwrap_or_default()),
                transport: RwLock::new(
                    self.transport
                        .unwrap_or_else(|| Arc::new(UnconfiguredTransport)),
                ),
                cache: RwLock::new(self.cache.unwrap_or_else(|| Arc::new(InMemoryCache::new()))),
                scheduler: self
                    .scheduler
                    .unwrap_or_else(|| Arc::new(TokioScheduler::new())),
                in_flight: InFlightRegistry::default(),
                retries: RetryCoordinator::default(),
                next_module: AtomicU64::new(1),
                next_request: AtomicU64::new(1),
            }),
        }
    }
}

/// A module: a bound module layer plus its identifier.
///
/// Calling it orchestrates one request and returns that request's chain.
///
/// ```no_run
/// use courier_core::config::{BehaviorConfig, LayerConfig, TransportConfig};
/// use courier_runtime::Courier;
///
/// let courier = Courier::new();
/// let users = courier.create_module(LayerConfig::transport(TransportConfig::new().base_url("/users")));
///
/// let _chain = users
///     .call(LayerConfig::transport(TransportConfig::new().url("/42")))
///     .success(|user| println!("{user}"))
///     .transport_error(|e| eprintln!("{e}"));
/// ```
#[derive(Clone)]
pub struct Module {
    engine: Arc<Engine>,
    id: ModuleId,
    layer: LayerConfig,
}

impl Module {
    /// This module's identifier.
    #[must_use]
    pub const fn id(&self) -> ModuleId {
        self.id
    }

    /// Orchestrate one request with a call-site layer.
    #[must_use = "the chain is the only way to observe the request"]
    pub fn call(&self, layer: LayerConfig) -> Chain {
        let resolver = ConfigResolver::new(self.layer.clone(), layer);
        Orchestrator::start(&self.engine, self.id, resolver)
    }

    /// Orchestrate one request with only a call-site transport fragment.
    #[must_use = "the chain is the only way to observe the request"]
    pub fn request(&self, transport: impl Into<ConfigSource<TransportConfig>>) -> Chain {
        self.call(LayerConfig::transport(transport))
    }

    /// Orchestrate one request with call-site transport and behavior fragments.
    #[must_use = "the chain is the only way to observe the request"]
    pub fn request_with(
        &self,
        transport: impl Into<ConfigSource<TransportConfig>>,
        behavior: impl Into<ConfigSource<BehaviorConfig>>,
    ) -> Chain {
        self.call(LayerConfig::new(transport, behavior))
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("id", &self.id)
            .field("layer", &self.layer)
            .finish_non_exhaustive()
    }
}
