//! Storage backend implementations.
//!
//! This module contains implementations of the `StorageBackend` trait
//! for the embedded redb engine and a process-local memory map.

use sensorhub_core::storage::{StorageBackend, StorageError};
use serde_json::Value;
use std::sync::Arc;

pub mod memory;

#[cfg(feature = "redb")]
pub mod redb;

pub use memory::MemoryBackend;

#[cfg(feature = "redb")]
pub use redb::{RedbBackend, RedbBackendConfig};

/// Create a storage backend by type identifier.
///
/// # Example
/// ```no_run
/// use sensorhub_storage::backends::create_backend;
/// use serde_json::json;
///
/// let backend = create_backend("redb", &json!({ "path": "./data/sensorhub.redb" })).unwrap();
/// assert!(backend.is_persistent());
/// ```
pub fn create_backend(
    backend_type: &str,
    config: &Value,
) -> sensorhub_core::storage::Result<Arc<dyn StorageBackend>> {
    match backend_type {
        #[cfg(feature = "redb")]
        "redb" => {
            let cfg: RedbBackendConfig = serde_json::from_value(config.clone()).map_err(|e| {
                StorageError::Configuration(format!("Invalid redb config: {}", e))
            })?;
            Ok(Arc::new(redb::RedbBackend::new(cfg)?))
        }

        "memory" => Ok(Arc::new(MemoryBackend::new())),

        _ => Err(StorageError::Configuration(format!(
            "Unknown backend type: {}. Available backends: {}",
            backend_type,
            available_backends().join(", ")
        ))),
    }
}

/// Get list of available backend types (based on enabled features).
pub fn available_backends() -> Vec<&'static str> {
    #[cfg(feature = "redb")]
    return vec!["redb", "memory"];
    #[cfg(not(feature = "redb"))]
    vec!["memory"]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_backends() {
        let backends = available_backends();
        assert!(backends.contains(&"memory"));
    }

    #[test]
    fn test_create_backend_unknown() {
        let result = create_backend("firebase", &serde_json::json!({}));
        assert!(matches!(result, Err(StorageError::Configuration(_))));
    }

    #[test]
    fn test_create_memory_backend() {
        let backend = create_backend("memory", &serde_json::json!({})).unwrap();
        assert!(!backend.is_persistent());
    }
}
