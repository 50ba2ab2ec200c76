//! Alert evaluation and notification hand-off for SensorHub.
//!
//! This crate decides *whether* a reading should notify someone. Actual
//! delivery happens behind the [`NotificationChannel`] trait.

pub mod channels;
pub mod error;
pub mod evaluator;
pub mod intent;

pub use channels::{ChannelRegistry, ConsoleChannel, MemoryChannel, NotificationChannel};
pub use error::{Error, Result};
pub use evaluator::{AlertConfig, AlertEvaluator, AlertMode, AlertRuleSource};
pub use intent::NotificationIntent;
