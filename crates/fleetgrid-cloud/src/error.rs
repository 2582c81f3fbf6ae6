//! Errors surfaced by cloud collaborators.

use thiserror::Error;

/// Result type alias for collaborator calls.
pub type CloudResult<T> = Result<T, CloudError>;

/// Errors that can occur when calling the cluster, fleet or agent APIs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CloudError {
    #[error("{operation} failed: {message}")]
    Api { operation: String, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("request throttled: {0}")]
    Throttled(String),

    #[error("desired capacity {desired} exceeds fleet maximum {max}")]
    CapacityExceeded { desired: u32, max: u32 },
}

impl CloudError {
    pub fn api(operation: &str, message: impl Into<String>) -> Self {
        CloudError::Api {
            operation: operation.to_string(),
            message: message.into(),
        }
    }
}
