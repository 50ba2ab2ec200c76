//! Payload decoder.
//!
//! Turns a raw message body into a [`TelemetryRecord`]. Field names are
//! camelCase on the wire; the PascalCase spelling older firmware emits is
//! accepted as well.

use serde::Deserialize;

use crate::telemetry::{ActuatorEvent, SensorReading, TelemetryRecord};
use crate::timestamp;
use crate::topic::MessageClass;
use crate::DecodeError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SensorPayload {
    #[serde(default, alias = "SensorId")]
    sensor_id: String,
    #[serde(alias = "Timestamp")]
    timestamp: String,
    #[serde(default, alias = "Value")]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActuatorPayload {
    #[serde(default, alias = "ActuatorId")]
    actuator_id: String,
    #[serde(alias = "Timestamp")]
    timestamp: String,
    #[serde(default, alias = "Command")]
    command: String,
    #[serde(default, alias = "Value")]
    value: Option<i64>,
}

/// Decode `body` as the record type implied by `class`.
pub fn decode(class: MessageClass, body: &[u8]) -> Result<TelemetryRecord, DecodeError> {
    match class {
        MessageClass::Sensor => decode_sensor(body).map(TelemetryRecord::Sensor),
        MessageClass::Actuator => decode_actuator(body).map(TelemetryRecord::Actuator),
        MessageClass::Unknown => Err(DecodeError::Malformed(
            "no record type for unknown message class".to_string(),
        )),
    }
}

pub fn decode_sensor(body: &[u8]) -> Result<SensorReading, DecodeError> {
    let payload: SensorPayload =
        serde_json::from_slice(body).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    require("sensorId", &payload.sensor_id)?;

    Ok(SensorReading {
        timestamp: timestamp::parse(&payload.timestamp)?,
        sensor_id: payload.sensor_id,
        value: payload.value.unwrap_or_default(),
    })
}

pub fn decode_actuator(body: &[u8]) -> Result<ActuatorEvent, DecodeError> {
    let payload: ActuatorPayload =
        serde_json::from_slice(body).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    require("actuatorId", &payload.actuator_id)?;

    Ok(ActuatorEvent {
        timestamp: timestamp::parse(&payload.timestamp)?,
        actuator_id: payload.actuator_id,
        command: payload.command,
        value: payload.value,
    })
}

fn require(field: &str, value: &str) -> Result<(), DecodeError> {
    if value.trim().is_empty() {
        return Err(DecodeError::Malformed(format!("missing required field {}", field)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_sensor() {
        let body = br#"{"sensorId":"temp1","timestamp":"2024-06-01T12:00:00Z","value":"23.5"}"#;
        let record = decode(MessageClass::Sensor, body).unwrap();
        assert_eq!(record.entity_id(), "temp1");
        assert_eq!(record.epoch_millis(), 1717243200000);
        match record {
            TelemetryRecord::Sensor(r) => assert_eq!(r.value, "23.5"),
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_decode_pascal_case() {
        let body = br#"{"SensorId":"hum1","Timestamp":"2024-06-01T12:00:00.500000Z","Value":"61"}"#;
        let reading = decode_sensor(body).unwrap();
        assert_eq!(reading.sensor_id, "hum1");
        assert_eq!(reading.value, "61");
    }

    #[test]
    fn test_missing_or_null_value_is_empty() {
        let body = br#"{"sensorId":"hum1","timestamp":"2024-06-01T12:00:00Z"}"#;
        assert_eq!(decode_sensor(body).unwrap().value, "");
        let body = br#"{"sensorId":"hum1","timestamp":"2024-06-01T12:00:00Z","value":null}"#;
        assert_eq!(decode_sensor(body).unwrap().value, "");
    }

    #[test]
    fn test_non_string_value_is_malformed() {
        for value in ["61", "true", r#"{"a":1}"#, "[1,2]"] {
            let body = format!(
                r#"{{"sensorId":"hum1","timestamp":"2024-06-01T12:00:00Z","value":{}}}"#,
                value
            );
            assert!(
                matches!(decode_sensor(body.as_bytes()), Err(DecodeError::Malformed(_))),
                "accepted value {}",
                value
            );
        }
    }

    #[test]
    fn test_decode_actuator() {
        let body = br#"{"actuatorId":"relay1","timestamp":"2024-06-01T12:00:00Z","command":"on","value":1}"#;
        let event = decode_actuator(body).unwrap();
        assert_eq!(event.command, "on");
        assert_eq!(event.value, Some(1));

        let body = br#"{"actuatorId":"relay1","timestamp":"2024-06-01T12:00:00Z","command":"off"}"#;
        assert_eq!(decode_actuator(body).unwrap().value, None);
    }

    #[test]
    fn test_missing_id_is_malformed() {
        for body in [
            &br#"{"timestamp":"2024-06-01T12:00:00Z","value":"1"}"#[..],
            &br#"{"sensorId":"","timestamp":"2024-06-01T12:00:00Z","value":"1"}"#[..],
        ] {
            assert!(matches!(decode_sensor(body), Err(DecodeError::Malformed(_))));
        }
        let body = br#"{"timestamp":"2024-06-01T12:00:00Z","command":"on"}"#;
        assert!(matches!(decode_actuator(body), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_malformed_structure() {
        assert!(matches!(decode_sensor(b"{not json"), Err(DecodeError::Malformed(_))));
        assert!(matches!(decode_sensor(b"[1,2]"), Err(DecodeError::Malformed(_))));
        let body = br#"{"actuatorId":"r","timestamp":"2024-06-01T12:00:00Z","value":"high"}"#;
        assert!(matches!(decode_actuator(body), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_bad_timestamp() {
        let body = br#"{"sensorId":"temp1","timestamp":"yesterday","value":"1"}"#;
        assert!(matches!(decode_sensor(body), Err(DecodeError::BadTimestamp(_))));
    }
}
