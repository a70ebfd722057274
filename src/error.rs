//! Error types for the playground engine.

use thiserror::Error;

/// Errors raised by the isolated execution host.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Assembled document too large (max {max} bytes, got {actual} bytes)")]
    DocumentTooLarge { max: usize, actual: usize },

    #[error("Execution host is shut down")]
    HostClosed,

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Errors raised by the persistence collaborator.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("Project not found: {0}")]
    NotFound(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Top-level playground errors.
#[derive(Debug, Error)]
pub enum PlaygroundError {
    #[error("Playground is shut down")]
    Closed,

    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    Persist(#[from] PersistError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HostError::DocumentTooLarge {
            max: 100,
            actual: 200,
        };
        assert_eq!(
            err.to_string(),
            "Assembled document too large (max 100 bytes, got 200 bytes)"
        );

        let err = PersistError::NotFound("abc".into());
        assert!(err.to_string().contains("abc"));

        let err: PlaygroundError = HostError::HostClosed.into();
        assert_eq!(err.to_string(), "Execution host is shut down");
    }
}
