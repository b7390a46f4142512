//! Error types for the replication engine.

use replidoc_protocol::ValidationError;
use replidoc_storage::StorageError;
use thiserror::Error;

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by the replication engine.
///
/// The retry loops only ever re-run an operation when [`is_retryable`]
/// says so. Everything else aborts the current cycle and is reported
/// through the engine status.
///
/// [`is_retryable`]: EngineError::is_retryable
#[derive(Debug, Error)]
pub enum EngineError {
    /// The master could not be reached or the request failed in flight.
    ///
    /// `retryable` tells the retry loop whether a later attempt can
    /// succeed. Connection resets and timeouts are retryable; a
    /// rejected request body is not.
    #[error("transport error: {message}")]
    Transport {
        /// Human-readable description from the transport layer.
        message: String,
        /// Whether the same request may succeed if sent again.
        retryable: bool,
    },

    /// The master answered, but with a body the engine cannot parse.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// JSON encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The local document store failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A document failed the shared schema rules.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The engine was configured or driven incorrectly.
    #[error("configuration error: {0}")]
    Config(String),

    /// The initial replication pass gave up after exhausting retries.
    #[error("initial replication failed: {0}")]
    InitialSync(String),

    /// Cancellation was requested while an operation was in progress.
    #[error("replication cancelled")]
    Cancelled,

    /// The transport offers no live change stream.
    ///
    /// Callers fall back to interval polling when they see this.
    #[error("transport does not expose a change stream")]
    StreamUnavailable,

    /// Filesystem failure while touching leases or checkpoint files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a fatal transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Whether the failed operation may be retried unmodified.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { retryable: true, .. })
    }
}
