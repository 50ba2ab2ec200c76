//! Delivery channels for notification intents.

pub mod console;
pub mod memory;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::{NotificationIntent, Result};

pub use console::ConsoleChannel;
pub use memory::MemoryChannel;

/// Something that can carry a notification intent to a person or system.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Get the channel name.
    fn name(&self) -> &str;

    /// Get the channel type.
    fn channel_type(&self) -> &str;

    /// Check if the channel is enabled.
    fn is_enabled(&self) -> bool;

    /// Deliver an intent through this channel.
    async fn send(&self, intent: &NotificationIntent) -> Result<()>;
}

/// Registry of channels that intents are fanned out to.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: RwLock<HashMap<String, Arc<dyn NotificationChannel>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel instance, replacing any channel with the same name.
    pub async fn register(&self, channel: Arc<dyn NotificationChannel>) {
        let name = channel.name().to_string();
        self.channels.write().await.insert(name, channel);
    }

    /// Unregister a channel by name.
    pub async fn unregister(&self, name: &str) -> bool {
        self.channels.write().await.remove(name).is_some()
    }

    /// List all channel names, sorted.
    pub async fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.channels.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.channels.read().await.is_empty()
    }

    /// Send an intent to every enabled channel.
    ///
    /// Channel failures are logged and do not stop delivery to the others.
    /// Returns the number of channels that accepted the intent.
    pub async fn dispatch(&self, intent: &NotificationIntent) -> usize {
        let channels: Vec<Arc<dyn NotificationChannel>> =
            self.channels.read().await.values().cloned().collect();

        let mut delivered = 0;
        for channel in channels.iter().filter(|c| c.is_enabled()) {
            match channel.send(intent).await {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!(
                    channel = %channel.name(),
                    sensor_id = %intent.sensor_id,
                    error = %e,
                    "Notification delivery failed"
                ),
            }
        }

        if delivered == 0 {
            tracing::debug!(sensor_id = %intent.sensor_id, "No channel accepted notification");
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dispatch_skips_disabled() {
        let registry = ChannelRegistry::new();
        let live = Arc::new(MemoryChannel::new("live"));
        let off = Arc::new(MemoryChannel::disabled("off"));
        registry.register(live.clone()).await;
        registry.register(off.clone()).await;

        let intent = NotificationIntent::new("temp1", "Kitchen", "31", "AA");
        assert_eq!(registry.dispatch(&intent).await, 1);
        assert_eq!(live.count().await, 1);
        assert_eq!(off.count().await, 0);
        assert_eq!(registry.list_names().await, vec!["live", "off"]);
    }

    #[tokio::test]
    async fn test_unregister() {
        let registry = ChannelRegistry::new();
        registry.register(Arc::new(ConsoleChannel::new("console"))).await;
        assert_eq!(registry.len().await, 1);
        assert!(registry.unregister("console").await);
        assert!(!registry.unregister("console").await);
        assert!(registry.is_empty().await);
    }
}
