//! Error types for control-plane access.

use thiserror::Error;

/// Result type alias for control-plane operations.
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Errors that can occur while talking to the control plane.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("failed to create client: {0}")]
    Client(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("api error: {0}")]
    Api(String),

    #[error("watch error: {0}")]
    Watch(String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }
}
