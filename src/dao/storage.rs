use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached or rejected the operation.
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// A merge targeted a document that does not exist.
    #[error("document `{key}` does not exist")]
    Missing { key: String },
    /// A merge patch addressed a field path the backends cannot represent.
    #[error("invalid field path `{path}`: {reason}")]
    InvalidPath { path: String, reason: &'static str },
    /// A subscription stream ended without an error.
    #[error("subscription to `{key}` ended")]
    Closed { key: String },
    /// Optimistic merge retries were exhausted by concurrent writers.
    #[error("document `{key}` kept changing during merge ({attempts} attempts)")]
    Contention { key: String, attempts: u32 },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Build a [`StorageError::Missing`] for the given document key.
    pub fn missing(key: impl Into<String>) -> Self {
        StorageError::Missing { key: key.into() }
    }
}
