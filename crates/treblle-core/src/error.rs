//! Error types for the Treblle SDK.
//!
//! None of these errors ever reach the wrapped application's client. Capture
//! problems are downgraded to [`ErrorRecord`](crate::collector::ErrorRecord)s
//! inside the outgoing payload, and delivery problems are only logged.

use std::time::Duration;
use thiserror::Error;

/// Main error type for SDK operations.
#[derive(Debug, Error)]
pub enum TreblleError {
    /// The request or response body could not be read.
    #[error("Body read error: {0}")]
    BodyRead(String),

    /// JSON encoding or decoding failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The HTTP client failed to reach the collection endpoint.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The collection endpoint answered with an error status.
    #[error("Collector returned status {status} from {endpoint}")]
    Status {
        /// HTTP status code returned by the endpoint.
        status: u16,
        /// Endpoint the payload was sent to.
        endpoint: String,
    },

    /// The delivery did not finish before its deadline.
    #[error("Delivery timed out after {0:?}")]
    Timeout(Duration),

    /// The delivery was abandoned because the SDK is shutting down.
    #[error("Delivery cancelled by shutdown")]
    Cancelled,

    /// Configuration could not be applied.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl TreblleError {
    /// Create a body read error from any displayable error.
    pub fn body_read(err: impl std::fmt::Display) -> Self {
        Self::BodyRead(err.to_string())
    }

    /// Whether this error happened on the wire (as opposed to locally).
    pub fn is_delivery_error(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::Status { .. } | Self::Timeout(_) | Self::Cancelled
        )
    }
}

/// Result type for SDK operations.
pub type Result<T> = std::result::Result<T, TreblleError>;
