//! Error types for the ingestion path.

use thiserror::Error;

/// A payload that could not be turned into a telemetry record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Body is not a document of the expected shape, or a required field is missing.
    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// Timestamp is in neither accepted form.
    #[error("Bad timestamp: {0}")]
    BadTimestamp(String),
}

/// Message bus failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("Not connected to broker")]
    NotConnected,

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Publish failed: {0}")]
    Publish(String),
}

/// Failure processing a single inbound message.
///
/// Always contained to that message; never stops the ingestion loop.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Store error: {0}")]
    Store(#[from] sensorhub_storage::Error),
}

impl From<DecodeError> for sensorhub_core::Error {
    fn from(e: DecodeError) -> Self {
        sensorhub_core::Error::Validation(e.to_string())
    }
}

impl From<BusError> for sensorhub_core::Error {
    fn from(e: BusError) -> Self {
        sensorhub_core::Error::Bus(e.to_string())
    }
}

impl From<IngestError> for sensorhub_core::Error {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::UnknownTopic(t) => sensorhub_core::Error::Device(format!("unknown topic {}", t)),
            IngestError::Decode(d) => d.into(),
            IngestError::Store(s) => s.into(),
        }
    }
}
