//! Error types for building the HTTP transport

use thiserror::Error;

/// Errors that can occur while building a [`ReqwestTransport`](crate::ReqwestTransport)
#[derive(Debug, Error)]
pub enum HttpError {
    /// The origin is not an absolute URL
    #[error("Invalid origin {origin}: {reason}")]
    InvalidOrigin {
        /// The rejected origin
        origin: String,
        /// Why it was rejected
        reason: String,
    },

    /// The underlying client could not be built
    #[error("HTTP client setup failed: {0}")]
    Client(#[from] reqwest::Error),
}
