//! Error types for the storage crate.

use thiserror::Error;

pub use sensorhub_core::error::Error as CoreError;
use sensorhub_core::storage::StorageError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Storage error types.
#[derive(Debug, Error)]
pub enum Error {
    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Storage/Database error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Not found error.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<Error> for CoreError {
    fn from(e: Error) -> Self {
        match e {
            Error::Serialization(s) => CoreError::Serialization(s),
            Error::Storage(s) => CoreError::Storage(s),
            Error::NotFound(s) => CoreError::NotFound(s),
            Error::InvalidInput(s) => CoreError::Validation(s),
        }
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Serialization(s) => Error::Serialization(s),
            StorageError::KeyNotFound(s) => Error::NotFound(s),
            other => Error::Storage(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Storage(format!("Task join error: {}", e))
    }
}
