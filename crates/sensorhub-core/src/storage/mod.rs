//! Core storage abstractions for SensorHub.
//!
//! The external keyed store is modelled as a set of tables holding opaque
//! byte values under string keys. Telemetry history and alert rules are
//! layered on top of this trait in `sensorhub-storage`.

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Storage error types.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Key not found.
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Backend error.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl From<StorageError> for crate::Error {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Serialization(s) => crate::Error::Serialization(s),
            StorageError::KeyNotFound(s) => crate::Error::NotFound(s),
            StorageError::Configuration(s) => crate::Error::Config(s),
            other => crate::Error::Storage(other.to_string()),
        }
    }
}

/// Core storage backend trait.
///
/// A single `write` to one key is atomic; there are no multi-key
/// transactions. Implementations must be safe to call from many tasks at
/// once.
pub trait StorageBackend: Send + Sync {
    /// Write a value to a key in the specified table, replacing any previous value.
    fn write(&self, table: &str, key: &str, value: &[u8]) -> Result<()>;

    /// Read a value by key from the specified table.
    fn read(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete a key from the specified table.
    fn delete(&self, table: &str, key: &str) -> Result<bool>;

    /// Scan keys with a given prefix in the specified table.
    ///
    /// Returned keys have the table namespace stripped.
    fn scan(&self, table: &str, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Delete every key with the given prefix, returning how many were removed.
    fn delete_prefix(&self, table: &str, prefix: &str) -> Result<usize>;

    /// Check if this backend supports persistent storage.
    fn is_persistent(&self) -> bool;
}
