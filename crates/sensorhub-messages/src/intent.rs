//! Notification intents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Signal that a reading matched an alert rule and someone should be told.
///
/// How (and whether) the intent reaches a person is up to the channels it
/// is dispatched to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationIntent {
    pub sensor_id: String,
    pub sensor_name: String,
    /// The reading value that triggered the alert.
    pub trigger_value: String,
    pub device_address: String,
    pub created_at: DateTime<Utc>,
}

impl NotificationIntent {
    pub fn new(
        sensor_id: impl Into<String>,
        sensor_name: impl Into<String>,
        trigger_value: impl Into<String>,
        device_address: impl Into<String>,
    ) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            sensor_name: sensor_name.into(),
            trigger_value: trigger_value.into(),
            device_address: device_address.into(),
            created_at: Utc::now(),
        }
    }

    /// One-line human readable summary.
    pub fn summary(&self) -> String {
        let name = if self.sensor_name.is_empty() {
            self.sensor_id.as_str()
        } else {
            self.sensor_name.as_str()
        };
        format!(
            "Alert from {} ({}) on {}: value {}",
            name, self.sensor_id, self.device_address, self.trigger_value
        )
    }
}
