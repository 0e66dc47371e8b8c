//! Error types for psychohistory-core.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias using psychohistory-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building a tree.
#[derive(Error, Debug)]
pub enum Error {
    /// Request input failed validation
    #[error("validation error: {0}")]
    Validation(String),

    /// HTTP-level failure talking to an upstream service
    #[error("transport error from {service}: {message}")]
    Transport { service: String, message: String },

    /// Upstream returned HTTP 429
    #[error("{service} rate limited the request: {message}")]
    RateLimited { service: String, message: String },

    /// Upstream rejected the request outright (non-retryable status)
    #[error("{service} rejected the request ({status}): {message}")]
    Upstream {
        service: String,
        status: u16,
        message: String,
    },

    /// Model output failed JSON parsing or schema validation
    #[error("schema error: {0}")]
    Schema(String),

    /// Timeout during operation
    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// A node pipeline failed irrecoverably
    #[error("pipeline failed for node {node_id}: {message}")]
    Pipeline { node_id: Uuid, message: String },

    /// Scheduler invariant violation or sink write failure
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a transport error for a named upstream service.
    pub fn transport(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Create a rate-limit error for a named upstream service.
    pub fn rate_limited(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RateLimited {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Create a non-retryable upstream rejection.
    pub fn upstream(service: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self::Upstream {
            service: service.into(),
            status,
            message: message.into(),
        }
    }

    /// Create a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema(message.into())
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a pipeline error for a node.
    pub fn pipeline(node_id: Uuid, message: impl Into<String>) -> Self {
        Self::Pipeline {
            node_id,
            message: message.into(),
        }
    }

    /// Create a scheduler error.
    pub fn scheduler(message: impl Into<String>) -> Self {
        Self::Scheduler(message.into())
    }

    /// Whether a retry ladder may re-attempt the failed call.
    ///
    /// Covers HTTP 429 and network-level transport failures. Upstream
    /// rejections with other statuses and schema failures are handled by
    /// their own policies one layer up.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transport { .. })
    }
}
