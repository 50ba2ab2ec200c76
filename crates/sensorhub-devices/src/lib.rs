//! Device telemetry ingestion for SensorHub.
//!
//! ```text
//! MqttBus ─▶ TopicRouter ─▶ payload::decode ─▶ HistoryStore ─▶ AlertEvaluator
//!             (classify)     (+ timestamp)       (append)      (sensors only)
//! ```

pub mod bus;
pub mod error;
pub mod ingest;
pub mod mqtt;
pub mod payload;
pub mod telemetry;
pub mod timestamp;
pub mod topic;

pub use bus::{ChannelBus, ConnectionState, InboundMessage, MessageBus};
pub use error::{BusError, DecodeError, IngestError};
pub use ingest::{IngestOutcome, IngestionPipeline, IngestionService};
pub use mqtt::{MqttBus, MqttConfig, Qos, ReconnectPolicy};
pub use telemetry::{ActuatorEvent, SensorReading, TelemetryRecord};
pub use topic::{topic_matches, MessageClass, TelemetryTopic, TopicConfig, TopicRouter};
