//! Topic router.
//!
//! Devices publish under `{prefix}/{deviceAddress}/{marker}/...`, where the
//! marker names the message class. The device address sits at a fixed index
//! that follows from the number of segments in the prefix.

use serde::{Deserialize, Serialize};

use sensorhub_core::config::{defaults, normalize_topic_prefix};
use sensorhub_storage::EntityKind;

/// Class of an inbound message, derived from its topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageClass {
    Sensor,
    Actuator,
    Unknown,
}

impl MessageClass {
    /// History partition for this class, if it is stored at all.
    pub fn entity_kind(&self) -> Option<EntityKind> {
        match self {
            Self::Sensor => Some(EntityKind::Sensors),
            Self::Actuator => Some(EntityKind::Actuators),
            Self::Unknown => None,
        }
    }
}

/// Result of classifying a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryTopic {
    pub device_address: String,
    pub message_class: MessageClass,
    pub raw_topic: String,
}

/// Topic layout settings (`[ingest]` in the config file).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicConfig {
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_sensor_marker")]
    pub sensor_marker: String,
    #[serde(default = "default_actuator_marker")]
    pub actuator_marker: String,
}

fn default_prefix() -> String {
    defaults::TOPIC_PREFIX.to_string()
}

fn default_sensor_marker() -> String {
    defaults::SENSOR_MARKER.to_string()
}

fn default_actuator_marker() -> String {
    defaults::ACTUATOR_MARKER.to_string()
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            sensor_marker: default_sensor_marker(),
            actuator_marker: default_actuator_marker(),
        }
    }
}

/// Classifies inbound topics and produces the matching subscription filters.
#[derive(Debug, Clone)]
pub struct TopicRouter {
    prefix: String,
    prefix_segments: Vec<String>,
    sensor_marker: String,
    actuator_marker: String,
}

impl TopicRouter {
    pub fn new(config: &TopicConfig) -> sensorhub_core::Result<Self> {
        let prefix = normalize_topic_prefix(&config.prefix)?;
        for marker in [&config.sensor_marker, &config.actuator_marker] {
            if marker.is_empty() || marker.contains(['/', '+', '#']) {
                return Err(sensorhub_core::config_err!(
                    "topic marker must be a single plain segment: {:?}",
                    marker
                ));
            }
        }
        if config.sensor_marker == config.actuator_marker {
            return Err(sensorhub_core::config_err!(
                "sensor and actuator markers must differ"
            ));
        }

        let prefix_segments = if prefix.is_empty() {
            Vec::new()
        } else {
            prefix.split('/').map(str::to_string).collect()
        };

        Ok(Self {
            prefix,
            prefix_segments,
            sensor_marker: config.sensor_marker.clone(),
            actuator_marker: config.actuator_marker.clone(),
        })
    }

    /// Index of the device address segment.
    pub fn device_index(&self) -> usize {
        self.prefix_segments.len()
    }

    /// Wildcard filters to subscribe to, sensors first.
    pub fn subscriptions(&self) -> Vec<String> {
        [&self.sensor_marker, &self.actuator_marker]
            .into_iter()
            .map(|marker| {
                if self.prefix.is_empty() {
                    format!("+/{}/#", marker)
                } else {
                    format!("{}/+/{}/#", self.prefix, marker)
                }
            })
            .collect()
    }

    /// Classify `topic`. Never fails; anything unrecognised is `Unknown`.
    pub fn classify(&self, topic: &str) -> TelemetryTopic {
        let segments: Vec<&str> = topic.split('/').collect();
        let index = self.device_index();

        let under_prefix = segments.len() > index + 1
            && segments
                .iter()
                .zip(&self.prefix_segments)
                .all(|(seg, expected)| *seg == expected);

        let device_address = if under_prefix {
            segments[index].to_string()
        } else {
            String::new()
        };

        let message_class = if !under_prefix || device_address.is_empty() {
            MessageClass::Unknown
        } else {
            let tail = &segments[index + 1..];
            if tail.iter().any(|s| *s == self.sensor_marker) {
                MessageClass::Sensor
            } else if tail.iter().any(|s| *s == self.actuator_marker) {
                MessageClass::Actuator
            } else {
                MessageClass::Unknown
            }
        };

        TelemetryTopic {
            device_address,
            message_class,
            raw_topic: topic.to_string(),
        }
    }
}

/// MQTT topic filter matching with `+` and `#` wildcards.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_parts = filter.split('/');
    let mut topic_parts = topic.split('/');

    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
