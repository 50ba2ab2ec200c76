//! Typed telemetry records as persisted in the history store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sensorhub_storage::EntityKind;

/// A single sensor measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    pub sensor_id: String,
    pub timestamp: DateTime<Utc>,
    pub value: String,
}

/// A command executed (or reported) by an actuator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActuatorEvent {
    pub actuator_id: String,
    pub timestamp: DateTime<Utc>,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<i64>,
}

/// Either kind of decoded record.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryRecord {
    Sensor(SensorReading),
    Actuator(ActuatorEvent),
}

impl TelemetryRecord {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Sensor(_) => EntityKind::Sensors,
            Self::Actuator(_) => EntityKind::Actuators,
        }
    }

    pub fn entity_id(&self) -> &str {
        match self {
            Self::Sensor(r) => &r.sensor_id,
            Self::Actuator(e) => &e.actuator_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Sensor(r) => r.timestamp,
            Self::Actuator(e) => e.timestamp,
        }
    }

    /// Storage ordering key.
    pub fn epoch_millis(&self) -> i64 {
        self.timestamp().timestamp_millis()
    }
}

impl From<SensorReading> for TelemetryRecord {
    fn from(r: SensorReading) -> Self {
        Self::Sensor(r)
    }
}

impl From<ActuatorEvent> for TelemetryRecord {
    fn from(e: ActuatorEvent) -> Self {
        Self::Actuator(e)
    }
}
