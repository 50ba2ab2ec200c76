//! Core traits and types for SensorHub.
//!
//! This crate defines the foundational abstractions shared by the storage,
//! messaging and device crates.

pub mod config;
pub mod error;
pub mod storage;

pub use error::{Error, Result};
pub use storage::{StorageBackend, StorageError};

/// Re-exports commonly used types.
pub mod prelude {
    // Configuration
    pub use crate::config::{defaults, env_vars};

    // Error handling
    pub use crate::error::{Error, Result};

    // Storage
    pub use crate::storage::{StorageBackend, StorageError};
}
