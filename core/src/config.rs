//! Configuration fragments and layers.
//!
//! Every request is described by three layers (global, module, call-site). Each
//! layer carries a [`TransportConfig`] fragment (what goes on the wire) and a
//! [`BehaviorConfig`] fragment (processors, cache, retry, predicate, extractor).
//!
//! A layer may be static or a producer evaluated fresh on every resolution:
//!
//! ```
//! use courier_core::config::{ConfigSource, TransportConfig};
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicU32, Ordering};
//!
//! let version = Arc::new(AtomicU32::new(1));
//! let seen = Arc::clone(&version);
//! let source = ConfigSource::producer(move || {
//!     TransportConfig::new().header("authorization", format!("token-{}", seen.load(Ordering::SeqCst)))
//! });
//!
//! assert_eq!(source.resolve().headers["authorization"], "token-1");
//! version.store(2, Ordering::SeqCst);
//! assert_eq!(source.resolve().headers["authorization"], "token-2");
//! ```

use crate::cache::{CacheDescriptor, StorageClass};
use crate::processor::{
    ErrorProcessor, FinallyProcessor, IntoFlow, LoadingProcessor, SuccessProcessor,
    TransportErrorProcessor, wrap_error, wrap_finally, wrap_loading, wrap_success,
    wrap_transport_error,
};
use crate::retry::{RetryRule, RetryWhen};
use crate::transport::{Outcome, RequestConfig, Response, Transport, TransportError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// GET
    #[default]
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
    /// HEAD
    Head,
    /// OPTIONS
    Options,
}

impl Method {
    /// Upper-case wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request body.
///
/// Only a JSON object is "object-shaped" and merges across layers. Every other
/// variant is an opaque payload that replaces anything from farther layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Body {
    /// JSON payload
    Json(Value),
    /// Pre-serialized text
    Text(String),
    /// Binary payload
    Bytes(Vec<u8>),
    /// URL-encoded form fields
    Form(Vec<(String, String)>),
}

impl Body {
    /// JSON body from anything serializable into a `Value`.
    #[must_use]
    pub fn json(value: impl Into<Value>) -> Self {
        Self::Json(value.into())
    }

    /// Whether this body merges key-by-key with other layers.
    #[must_use]
    pub const fn is_object(&self) -> bool {
        matches!(self, Self::Json(Value::Object(_)))
    }
}

/// The transport half of a layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Path fragment joined across layers
    pub base_url: Option<String>,
    /// Request path (nearest layer wins)
    pub url: Option<String>,
    /// HTTP method (nearest layer wins)
    pub method: Option<Method>,
    /// Headers (merged, nearest layer wins per key)
    pub headers: BTreeMap<String, String>,
    /// Query parameters (merged, nearest layer wins per key)
    pub params: BTreeMap<String, String>,
    /// Body (see [`Body`] merge rules)
    pub body: Option<Body>,
    /// Timeout in milliseconds on the wire format
    #[serde(with = "duration_ms")]
    pub timeout: Option<Duration>,
}

impl TransportConfig {
    /// Empty fragment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a fragment from JSON.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when the document does not match the schema.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Set the base path fragment.
    #[must_use]
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Set the request path.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the method.
    #[must_use]
    pub const fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Add a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Add a query parameter.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Set the body.
    #[must_use]
    pub fn body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    /// Set the timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[allow(clippy::ref_option, clippy::cast_possible_truncation)] // serde `with` passes a reference
    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

/// Business-success predicate: `true` means the response is a success.
pub type Predicate = Arc<dyn Fn(&Response) -> bool + Send + Sync>;

/// Turns a successful response into the value handed to `success` processors.
pub type Extractor = Arc<dyn Fn(&Response) -> Value + Send + Sync>;

/// The behavior half of a layer.
///
/// Processors from all three layers are collected; every other field is
/// resolved nearest-wins (call-site, then module, then global).
#[derive(Clone, Default)]
pub struct BehaviorConfig {
    /// Loading processor
    pub loading: Option<LoadingProcessor>,
    /// Success processor
    pub success: Option<SuccessProcessor>,
    /// Business-error processor
    pub error: Option<ErrorProcessor>,
    /// Transport-error processor
    pub transport_error: Option<TransportErrorProcessor>,
    /// Finally processor
    pub finally: Option<FinallyProcessor>,
    /// Cache descriptor
    pub cache: Option<CacheDescriptor>,
    /// Retry policy
    pub retry_when: Option<RetryWhen>,
    /// Business-success predicate
    pub predicate: Option<Predicate>,
    /// Result extractor
    pub extractor: Option<Extractor>,
    /// `Some(false)` in any layer opts the request out of engine-wide cancellation
    pub cancelable: Option<bool>,
    /// Transport override
    pub transport: Option<Arc<dyn Transport>>,
}

impl BehaviorConfig {
    /// Empty fragment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the loading processor.
    #[must_use]
    pub fn loading<F, R>(mut self, f: F) -> Self
    where
        F: Fn(bool) -> R + Send + Sync + 'static,
        R: IntoFlow,
    {
        self.loading = Some(wrap_loading(f));
        self
    }

    /// Set the success processor.
    #[must_use]
    pub fn success<F, R>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> R + Send + Sync + 'static,
        R: IntoFlow,
    {
        self.success = Some(wrap_success(f));
        self
    }

    /// Set the business-error processor.
    #[must_use]
    pub fn error<F, R>(mut self, f: F) -> Self
    where
        F: Fn(&Response) -> R + Send + Sync + 'static,
        R: IntoFlow,
    {
        self.error = Some(wrap_error(f));
        self
    }

    /// Set the transport-error processor.
    #[must_use]
    pub fn transport_error<F, R>(mut self, f: F) -> Self
    where
        F: Fn(&TransportError) -> R + Send + Sync + 'static,
        R: IntoFlow,
    {
        self.transport_error = Some(wrap_transport_error(f));
        self
    }

    /// Set the finally processor.
    #[must_use]
    pub fn finally<F, R>(mut self, f: F) -> Self
    where
        F: Fn(&Outcome, Option<&RequestConfig>) -> R + Send + Sync + 'static,
        R: IntoFlow,
    {
        self.finally = Some(wrap_finally(f));
        self
    }

    /// Cache extracted results under `key` in `storage_class`.
    #[must_use]
    pub fn cache(mut self, storage_class: StorageClass, key: impl Into<String>) -> Self {
        self.cache = Some(CacheDescriptor::new(storage_class, key));
        self
    }

    /// Set the whole retry policy.
    #[must_use]
    pub fn retry_when(mut self, retry_when: RetryWhen) -> Self {
        self.retry_when = Some(retry_when);
        self
    }

    /// Retry when the transport succeeded and the rule's condition holds.
    #[must_use]
    pub fn retry_on_success(mut self, rule: RetryRule<Response>) -> Self {
        self.retry_when.get_or_insert_with(RetryWhen::default).on_success = Some(rule);
        self
    }

    /// Retry when the transport failed and the rule's condition holds.
    #[must_use]
    pub fn retry_on_error(mut self, rule: RetryRule<TransportError>) -> Self {
        self.retry_when.get_or_insert_with(RetryWhen::default).on_error = Some(rule);
        self
    }

    /// Set the business-success predicate.
    #[must_use]
    pub fn predicate<F>(mut self, f: F) -> Self
    where
        F: Fn(&Response) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(f));
        self
    }

    /// Set the result extractor.
    #[must_use]
    pub fn extractor<F>(mut self, f: F) -> Self
    where
        F: Fn(&Response) -> Value + Send + Sync + 'static,
    {
        self.extractor = Some(Arc::new(f));
        self
    }

    /// Opt in or out of engine-wide cancellation.
    #[must_use]
    pub const fn cancelable(mut self, cancelable: bool) -> Self {
        self.cancelable = Some(cancelable);
        self
    }

    /// Override the transport for requests built from this layer.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }
}

impl fmt::Debug for BehaviorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BehaviorConfig")
            .field("loading", &self.loading.is_some())
            .field("success", &self.success.is_some())
            .field("error", &self.error.is_some())
            .field("transport_error", &self.transport_error.is_some())
            .field("finally", &self.finally.is_some())
            .field("cache", &self.cache)
            .field("retry_when", &self.retry_when)
            .field("predicate", &self.predicate.is_some())
            .field("extractor", &self.extractor.is_some())
            .field("cancelable", &self.cancelable)
            .field("transport", &self.transport.is_some())
            .finish()
    }
}

/// A value or a zero-argument producer evaluated on every access.
pub enum ConfigSource<T> {
    /// Fixed value
    Static(Arc<T>),
    /// Evaluated fresh on every [`resolve`](Self::resolve)
    Producer(Arc<dyn Fn() -> T + Send + Sync>),
}

impl<T> ConfigSource<T> {
    /// Wrap a producer.
    pub fn producer<F>(f: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::Producer(Arc::new(f))
    }
}

impl<T: Clone> ConfigSource<T> {
    /// Current value of the source.
    #[must_use]
    pub fn resolve(&self) -> T {
        match self {
            Self::Static(value) => T::clone(value),
            Self::Producer(produce) => produce(),
        }
    }
}

impl<T> Clone for ConfigSource<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Static(value) => Self::Static(Arc::clone(value)),
            Self::Producer(produce) => Self::Producer(Arc::clone(produce)),
        }
    }
}

impl<T: Default> Default for ConfigSource<T> {
    fn default() -> Self {
        Self::Static(Arc::new(T::default()))
    }
}

impl<T> From<T> for ConfigSource<T> {
    fn from(value: T) -> Self {
        Self::Static(Arc::new(value))
    }
}

impl<T: fmt::Debug> fmt::Debug for ConfigSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(value) => f.debug_tuple("Static").field(value).finish(),
            Self::Producer(_) => f.write_str("Producer(<fn>)"),
        }
    }
}

/// One configuration layer: a transport fragment plus a behavior fragment.
#[derive(Debug, Clone, Default)]
pub struct LayerConfig {
    /// Transport fragment
    pub transport: ConfigSource<TransportConfig>,
    /// Behavior fragment
    pub behavior: ConfigSource<BehaviorConfig>,
}

impl LayerConfig {
    /// Build a layer from two sources.
    #[must_use]
    pub fn new(
        transport: impl Into<ConfigSource<TransportConfig>>,
        behavior: impl Into<ConfigSource<BehaviorConfig>>,
    ) -> Self {
        Self {
            transport: transport.into(),
            behavior: behavior.into(),
        }
    }

    /// Layer with only a transport fragment.
    #[must_use]
    pub fn transport(transport: impl Into<ConfigSource<TransportConfig>>) -> Self {
        Self::new(transport, BehaviorConfig::default())
    }

    /// Layer with only a behavior fragment.
    #[must_use]
    pub fn behavior(behavior: impl Into<ConfigSource<BehaviorConfig>>) -> Self {
        Self::new(TransportConfig::default(), behavior)
    }

    /// Evaluate both sources.
    #[must_use]
    pub fn snapshot(&self) -> LayerSnapshot {
        LayerSnapshot {
            transport: self.transport.resolve(),
            behavior: self.behavior.resolve(),
        }
    }
}

/// A layer with its producers evaluated.
#[derive(Debug, Clone, Default)]
pub struct LayerSnapshot {
    /// Transport fragment
    pub transport: TransportConfig,
    /// Behavior fragment
    pub behavior: BehaviorConfig,
}
