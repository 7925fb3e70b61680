//! Transport capability and the values that cross it.
//!
//! The engine never speaks HTTP itself. Every network round trip goes through an
//! injected [`Transport`], which receives a fully resolved [`RequestConfig`] and
//! answers with a [`Response`] or a [`TransportError`].
//!
//! # Architecture
//!
//! ```text
//! global layer ─┐
//! module layer ─┼─► ConfigResolver ─► RequestConfig ─► Transport::request
//! call layer  ──┘                                          │
//!                                                          ▼
//!                                     Result<Response, TransportError>
//!                                                          │
//!                                                          ▼
//!                                          predicate / extractor / processors
//! ```
//!
//! # Implementations
//!
//! - `ReqwestTransport` (in `courier-http`) - production transport over `reqwest`
//! - `MockTransport` (in `courier-testing`) - scripted replies for tests

use crate::config::{Body, Method};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a [`Transport`].
///
/// These are network/protocol failures. A response that arrived but is
/// semantically wrong is a business error and never becomes a `TransportError`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The request could not be sent or the connection broke
    #[error("Network failure: {0}")]
    Network(String),

    /// The server answered with a status the transport treats as a failure
    #[error("HTTP status {status}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body or reason phrase
        message: String,
    },

    /// The transport gave up waiting
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The request was aborted before it settled
    #[error("Request was cancelled")]
    Cancelled,

    /// The resolved configuration could not be turned into a request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The response body could not be decoded
    #[error("Response decoding failed: {0}")]
    Decode(String),

    /// No transport has been installed on the engine or any layer
    #[error("No transport configured")]
    NotConfigured,

    /// The engine's scheduler refused the request task
    #[error("Request could not be scheduled: {0}")]
    Unscheduled(String),
}

impl TransportError {
    /// Whether this error represents an aborted request rather than a failure.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// HTTP status carried by the error, if any.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// A transport-level response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// HTTP status code
    pub status: u16,
    /// Response headers (lower-cased names)
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Decoded body; non-JSON payloads arrive as `Value::String`
    pub body: Value,
}

impl Response {
    /// Create a `200 OK` response with the given body.
    #[must_use]
    pub fn ok(body: Value) -> Self {
        Self::new(200, body)
    }

    /// Create a response with an explicit status.
    #[must_use]
    pub fn new(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body,
        }
    }

    /// Attach a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    /// Whether the status is in the 2xx range.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// The effective request descriptor after all three layers are merged.
///
/// Built by [`ConfigResolver`](crate::resolver::ConfigResolver) on every attempt,
/// so producer-backed layers (e.g. a rotating token header) are re-read on retry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestConfig {
    /// Base path joined across layers
    pub base_url: String,
    /// Request path relative to `base_url`
    pub url: Option<String>,
    /// HTTP method
    pub method: Method,
    /// Merged headers (call-site wins)
    pub headers: BTreeMap<String, String>,
    /// Merged query parameters (call-site wins)
    pub params: BTreeMap<String, String>,
    /// Merged or overriding body
    pub body: Option<Body>,
    /// Per-request timeout enforced by the transport
    pub timeout: Option<Duration>,
    /// Whether the request takes part in engine-wide cancellation
    pub cancelable: bool,
    /// Identifier of the attempt this descriptor was built for
    pub request_id: u64,
}

impl RequestConfig {
    /// Absolute or relative endpoint: `base_url` joined with `url`.
    #[must_use]
    pub fn endpoint(&self) -> String {
        match self.url.as_deref() {
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => url.to_string(),
            Some(url) => crate::resolver::path_join(&[Some(self.base_url.as_str()), Some(url)]),
            None => self.base_url.clone(),
        }
    }
}

/// Raw outcome of one attempt, handed to `finally` processors.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The transport answered (business success or business error)
    Response(Response),
    /// The transport failed
    Failed(TransportError),
    /// The value was served from cache without touching the transport
    Cached(Value),
    /// The attempt was aborted
    Cancelled,
    /// Aggregate completion of a `race`/`all` combinator
    Combined,
}

impl Outcome {
    /// The response, when the transport answered.
    #[must_use]
    pub const fn response(&self) -> Option<&Response> {
        match self {
            Self::Response(response) => Some(response),
            _ => None,
        }
    }

    /// Whether the attempt ended by cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Future returned by [`Transport::request`].
pub type TransportFuture = BoxFuture<'static, Result<Response, TransportError>>;

/// The injected network capability.
///
/// # Dyn Compatibility
///
/// Returns an explicit boxed future instead of using `async fn` so the engine can
/// hold `Arc<dyn Transport>` in any configuration layer. The future must be
/// `'static` because the engine drives it from a spawned task.
pub trait Transport: Send + Sync {
    /// Issue one request.
    ///
    /// # Errors
    ///
    /// Resolves to a [`TransportError`] for network/protocol failures.
    fn request(&self, config: RequestConfig) -> TransportFuture;

    /// Classify an error as a cancellation.
    ///
    /// The engine aborts attempts itself, but transports that observe their own
    /// cancellation (e.g. a dropped connection pool) can report it here.
    fn is_cancellation(&self, error: &TransportError) -> bool {
        error.is_cancellation()
    }
}

/// Transport used until a real one is installed.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredTransport;

impl Transport for UnconfiguredTransport {
    fn request(&self, _config: RequestConfig) -> TransportFuture {
        Box::pin(async { Err(TransportError::NotConfigured) })
    }
}
