//! Error types for the master store service.

use replidoc_protocol::ValidationError;
use replidoc_storage::StorageError;
use thiserror::Error;

/// Result type for master operations.
pub type MasterResult<T> = Result<T, MasterError>;

/// Errors that can occur in the master store service.
#[derive(Error, Debug)]
pub enum MasterError {
    /// Invalid request format or parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A document failed the schema boundary check.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A request body or response could not be (de)serialized.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// No handler for the requested route.
    #[error("unknown route: {method} {path}")]
    UnknownRoute {
        /// Request method.
        method: String,
        /// Request path, query string stripped.
        path: String,
    },

    /// The backing document store failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl MasterError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            MasterError::InvalidRequest(_)
                | MasterError::Validation(_)
                | MasterError::Codec(_)
                | MasterError::UnknownRoute { .. }
        )
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        matches!(self, MasterError::Storage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(MasterError::InvalidRequest("bad".into()).is_client_error());
        assert!(MasterError::Validation(ValidationError::MissingPassportId).is_client_error());
        assert!(
            MasterError::Storage(StorageError::Backend("down".into())).is_server_error()
        );
        assert!(!MasterError::InvalidRequest("bad".into()).is_server_error());
    }

    #[test]
    fn error_display() {
        let err = MasterError::UnknownRoute {
            method: "PUT".into(),
            path: "/nope".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("PUT"));
        assert!(msg.contains("/nope"));
    }
}
