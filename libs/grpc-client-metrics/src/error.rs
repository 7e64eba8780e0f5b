//! Error types for metric setup
//!
//! Only construction and configuration can fail. Recording on the call path
//! never returns an error; call failures travel as `tonic::Status`.

use thiserror::Error;

/// Result type for metric setup operations
pub type Result<T> = std::result::Result<T, MetricsError>;

/// Errors that can occur while building or registering client metrics
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Metric creation or registration rejected by Prometheus
    #[error("Prometheus registry error: {0}")]
    Prometheus(#[from] prometheus::Error),

    /// Histogram bucket boundaries are empty, unordered or not finite
    #[error("Invalid histogram buckets: {0}")]
    InvalidBuckets(String),

    /// Environment configuration could not be parsed
    #[error("Invalid metrics configuration: {0}")]
    Config(#[from] envy::Error),
}

impl MetricsError {
    /// Create an invalid buckets error
    pub fn invalid_buckets(msg: impl Into<String>) -> Self {
        Self::InvalidBuckets(msg.into())
    }
}
