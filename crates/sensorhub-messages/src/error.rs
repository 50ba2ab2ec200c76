//! Error types for alert evaluation and notification.

use thiserror::Error;

/// Result type for message operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while evaluating alerts or handing off notifications.
#[derive(Debug, Error)]
pub enum Error {
    /// Alert rule lookup failed.
    #[error("Rule lookup failed: {0}")]
    Lookup(String),

    /// Channel is disabled.
    #[error("Channel disabled: {0}")]
    ChannelDisabled(String),

    /// Send operation failed.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl From<sensorhub_storage::Error> for Error {
    fn from(e: sensorhub_storage::Error) -> Self {
        Error::Lookup(e.to_string())
    }
}

impl From<Error> for sensorhub_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::InvalidConfiguration(s) => sensorhub_core::Error::Config(s),
            other => sensorhub_core::Error::Alert(other.to_string()),
        }
    }
}
