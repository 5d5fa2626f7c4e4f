//! Error types for coordination operations.
//!
//! Provides typed variants so that consumers can distinguish between
//! namespace conditions (absent node, conflicting create, non-empty
//! delete) and connectivity failures without leaking backend internals.

use thiserror::Error;

/// Top-level error type for the keeper-coordination crate.
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// The addressed node (or a required parent) does not exist.
    #[error("node not found: {0}")]
    NotFound(String),

    /// A create collided with an existing node at the same path.
    #[error("node already exists: {0}")]
    AlreadyExists(String),

    /// A delete was attempted on a node that still has children.
    #[error("node not empty: {0}")]
    NotEmpty(String),

    /// A create addressed a parent that is ephemeral; ephemeral nodes can
    /// never have children, so retrying cannot succeed.
    #[error("ephemeral node cannot have children: {0}")]
    EphemeralParent(String),

    /// The session was expired by the service and this client instance is
    /// no longer usable.
    #[error("session expired")]
    SessionExpired,

    /// The client is not connected or connection was lost.
    #[error("not connected: {0}")]
    NotConnected(String),

    /// Connection or request-level failure against the backing service.
    #[error("transport error: {0}")]
    Transport(String),

    /// Operation timed out waiting for the backing service.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Configuration error (e.g. missing required fields).
    #[error("configuration error: {0}")]
    Config(String),
}

impl CoordinationError {
    /// Returns true if this error indicates a transient failure that may
    /// succeed on retry (transport or timeout).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoordinationError::Transport(_) | CoordinationError::Timeout(_)
        )
    }

    /// Returns true if this error reports an absent node.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoordinationError::NotFound(_))
    }

    /// Returns true if this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, CoordinationError::Timeout(_))
    }
}

/// Shorthand result alias for coordination operations.
pub type CoordinationResult<T> = Result<T, CoordinationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let transport = CoordinationError::Transport("conn reset".into());
        assert!(transport.is_retryable());
        assert!(!transport.is_not_found());
        assert!(!transport.is_timeout());

        let timeout = CoordinationError::Timeout("deadline exceeded".into());
        assert!(timeout.is_retryable());
        assert!(timeout.is_timeout());

        let not_found = CoordinationError::NotFound("/a/b".into());
        assert!(!not_found.is_retryable());
        assert!(not_found.is_not_found());

        let existed = CoordinationError::AlreadyExists("/a/b".into());
        assert!(!existed.is_retryable());

        let not_empty = CoordinationError::NotEmpty("/a".into());
        assert!(!not_empty.is_retryable());

        let ephemeral_parent = CoordinationError::EphemeralParent("/worker".into());
        assert!(!ephemeral_parent.is_retryable());

        let expired = CoordinationError::SessionExpired;
        assert!(!expired.is_retryable());

        let not_conn = CoordinationError::NotConnected("no conn".into());
        assert!(!not_conn.is_retryable());

        let config = CoordinationError::Config("missing server".into());
        assert!(!config.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = CoordinationError::NotFound("/leader_follower".into());
        assert!(format!("{err}").contains("/leader_follower"));

        let err = CoordinationError::NotEmpty("/parent".into());
        assert!(format!("{err}").contains("not empty"));
    }
}
