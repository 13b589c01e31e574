//! Errors surfaced by counter store implementations.

use thiserror::Error;

/// Errors that can occur in counter store operations.
///
/// The rate limiter forwards these unchanged; only the HTTP boundary decides
/// how a failed decision is answered.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached (connection refused, dropped, I/O).
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// The backing store answered with something we could not interpret.
    #[error("storage protocol error: {0}")]
    Protocol(String),

    /// The operation did not complete within its deadline.
    #[error("storage operation `{operation}` timed out")]
    Timeout { operation: &'static str },

    /// No constructor is registered under the requested storage name.
    #[error("storage not found: {0}")]
    StorageNotFound(String),

    /// The connection parameters for a store are unusable.
    #[error("invalid storage configuration: {0}")]
    InvalidConfig(String),

    /// The store was used after `close`.
    #[error("storage is closed")]
    Closed,
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        use redis::ErrorKind;

        match err.kind() {
            ErrorKind::TypeError | ErrorKind::ResponseError => StoreError::Protocol(err.to_string()),
            ErrorKind::InvalidClientConfig => StoreError::InvalidConfig(err.to_string()),
            _ => StoreError::Unavailable(err.to_string()),
        }
    }
}
