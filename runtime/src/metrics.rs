//! Prometheus metrics for request orchestration.
//!
//! Counters are recorded through the `metrics` facade, so they cost nothing
//! until a recorder is installed. [`MetricsExporter`] installs the Prometheus
//! recorder and renders the current snapshot.
//!
//! # Example
//!
//! ```rust,no_run
//! use courier_runtime::metrics::MetricsExporter;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut exporter = MetricsExporter::new();
//! exporter.install()?;
//!
//! // ... issue requests ...
//!
//! if let Some(snapshot) = exporter.render() {
//!     println!("{snapshot}");
//! }
//! # Ok(())
//! # }
//! ```

use courier_core::retry::RetryScope;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder handle.
#[derive(Default)]
pub struct MetricsExporter {
    handle: Option<PrometheusHandle>,
}

impl MetricsExporter {
    /// Exporter with no recorder installed yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Register descriptions and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// A recorder can be installed once per process. If one already is (e.g.
    /// from another test), this logs a warning and leaves `render` returning `None`.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Metrics recorder installed");
                Ok(())
            },
            Err(e) => {
                let message = e.to_string();
                if message.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(message))
                }
            },
        }
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if this exporter did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

impl std::fmt::Debug for MetricsExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsExporter")
            .field("installed", &self.handle.is_some())
            .finish()
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(
        "courier_requests_total",
        "Total number of request attempts dispatched, retries included"
    );
    describe_counter!(
        "courier_cache_hits_total",
        "Total number of attempts served from cache"
    );
    describe_counter!(
        "courier_retries_total",
        "Total number of coordinated retries triggered, by scope"
    );
    describe_counter!(
        "courier_outcomes_total",
        "Total number of terminal outcomes, by outcome"
    );
    describe_histogram!(
        "courier_transport_duration_seconds",
        "Time from dispatch to transport settlement"
    );
}

/// Terminal outcome label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeLabel {
    /// Business success
    Success,
    /// Business error
    BusinessError,
    /// Transport error
    TransportError,
    /// Cancelled
    Cancelled,
    /// Served from cache
    Cached,
}

impl OutcomeLabel {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::BusinessError => "business_error",
            Self::TransportError => "transport_error",
            Self::Cancelled => "cancelled",
            Self::Cached => "cached",
        }
    }
}

/// Request metrics recorder.
pub struct RequestMetrics;

impl RequestMetrics {
    /// Record a dispatched attempt.
    pub fn record_request() {
        counter!("courier_requests_total").increment(1);
    }

    /// Record an attempt served from cache.
    pub fn record_cache_hit() {
        counter!("courier_cache_hits_total").increment(1);
    }

    /// Record a triggered retry.
    pub fn record_retry(scope: RetryScope) {
        counter!("courier_retries_total", "scope" => scope.to_string()).increment(1);
    }

    /// Record a terminal outcome.
    pub fn record_outcome(outcome: OutcomeLabel) {
        counter!("courier_outcomes_total", "outcome" => outcome.as_str()).increment(1);
    }

    /// Record how long the transport took.
    pub fn record_transport_duration(duration: Duration) {
        histogram!("courier_transport_duration_seconds").record(duration.as_secs_f64());
    }
}
