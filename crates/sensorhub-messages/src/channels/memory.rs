//! Memory notification channel (for testing).

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::NotificationChannel;
use crate::{Error, NotificationIntent, Result};

/// In-memory channel that records every intent it receives.
#[derive(Debug, Clone)]
pub struct MemoryChannel {
    name: String,
    enabled: bool,
    intents: Arc<Mutex<Vec<NotificationIntent>>>,
}

impl MemoryChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            intents: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn disabled(name: impl Into<String>) -> Self {
        Self {
            enabled: false,
            ..Self::new(name)
        }
    }

    pub async fn intents(&self) -> Vec<NotificationIntent> {
        self.intents.lock().await.clone()
    }

    pub async fn clear(&self) {
        self.intents.lock().await.clear();
    }

    pub async fn count(&self) -> usize {
        self.intents.lock().await.len()
    }
}

#[async_trait]
impl NotificationChannel for MemoryChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn channel_type(&self) -> &str {
        "memory"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn send(&self, intent: &NotificationIntent) -> Result<()> {
        if !self.enabled {
            return Err(Error::ChannelDisabled(self.name.clone()));
        }
        self.intents.lock().await.push(intent.clone());
        Ok(())
    }
}
