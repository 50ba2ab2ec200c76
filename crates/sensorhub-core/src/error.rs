//! Unified error handling for SensorHub.
//!
//! Each crate keeps its own error enum and converts into this one at
//! crate boundaries.

/// Unified error type for SensorHub.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage/database errors.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Device telemetry errors.
    #[error("Device error: {0}")]
    Device(String),

    /// Message bus errors.
    #[error("Bus error: {0}")]
    Bus(String),

    /// Alert evaluation and notification errors.
    #[error("Alert error: {0}")]
    Alert(String),

    /// Validation errors.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found errors.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization/deserialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, Error>;

/// Convenience macros for creating errors.
#[macro_export]
macro_rules! config_err {
    ($msg:expr) => {
        $crate::error::Error::Config($msg.into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::Config(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! validation_err {
    ($msg:expr) => {
        $crate::error::Error::Validation($msg.into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::Validation(format!($fmt, $($arg)*))
    };
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(e.to_string())
    }
}
