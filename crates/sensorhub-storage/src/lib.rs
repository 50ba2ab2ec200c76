//! Persistent storage for SensorHub.
//!
//! ## Features
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `redb` | ✅ | Embedded redb database backend |
//!
//! ## Layout
//!
//! ```text
//! data/{device}/sensors/{sensorId}/{epochMillis}     -> SensorReading
//! data/{device}/actuators/{actuatorId}/{epochMillis} -> ActuatorEvent
//! alerts/{sensorId}                                  -> AlertRule
//! ```

pub mod alerts;
pub mod backends;
pub mod error;
pub mod history;

pub use alerts::{AlertRule, AlertRuleStore, ComparisonOperator, ALERTS_TABLE};
pub use backends::{available_backends, create_backend, MemoryBackend};
#[cfg(feature = "redb")]
pub use backends::{RedbBackend, RedbBackendConfig};
pub use error::{Error, Result};
pub use history::{EntityKind, HistoryEntry, HistoryKey, HistoryStore, HISTORY_TABLE};
