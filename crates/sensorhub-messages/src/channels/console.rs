//! Console notification channel.

use async_trait::async_trait;

use super::NotificationChannel;
use crate::{Error, NotificationIntent, Result};

/// Writes intents to the log at `warn` level.
#[derive(Debug, Clone)]
pub struct ConsoleChannel {
    name: String,
    enabled: bool,
}

impl ConsoleChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
        }
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }
}

#[async_trait]
impl NotificationChannel for ConsoleChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn channel_type(&self) -> &str {
        "console"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn send(&self, intent: &NotificationIntent) -> Result<()> {
        if !self.enabled {
            return Err(Error::ChannelDisabled(self.name.clone()));
        }

        tracing::warn!(
            channel = %self.name,
            sensor_id = %intent.sensor_id,
            sensor_name = %intent.sensor_name,
            device = %intent.device_address,
            value = %intent.trigger_value,
            "{}",
            intent.summary()
        );
        Ok(())
    }
}
