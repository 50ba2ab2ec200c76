//! Message bus abstraction.
//!
//! The ingestion service only needs a stream of [`InboundMessage`]s and a
//! handle to publish through. [`MqttBus`](crate::MqttBus) is the production
//! implementation; [`ChannelBus`] loops publishes back in-process and is
//! used to drive the pipeline without a broker.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, RwLock};

use crate::mqtt::Qos;
use crate::topic::topic_matches;
use crate::BusError;

/// Connection lifecycle of a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// A message received from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Handle to a publish/subscribe transport.
///
/// Inbound messages are not pulled through the trait; each implementation
/// hands out an `mpsc::Receiver<InboundMessage>` when it is created.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Current connection state.
    fn state(&self) -> ConnectionState;

    /// Watch connection state transitions.
    fn state_changes(&self) -> watch::Receiver<ConnectionState>;

    /// Add a subscription filter.
    async fn subscribe(&self, filter: &str, qos: Qos) -> Result<(), BusError>;

    /// Publish `payload` on `topic`. Fails with [`BusError::NotConnected`]
    /// unless the bus is connected.
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: Qos) -> Result<(), BusError>;

    /// Publish an outbound device command with exactly-once delivery.
    async fn send_command(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.publish(topic, payload, Qos::ExactlyOnce).await
    }

    /// Disconnect. Inbound delivery stops.
    async fn disconnect(&self) -> Result<(), BusError>;
}

/// In-process bus: published messages are delivered to its own receiver when
/// they match a subscription.
#[derive(Clone)]
pub struct ChannelBus {
    tx: mpsc::Sender<InboundMessage>,
    filters: Arc<RwLock<Vec<String>>>,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl ChannelBus {
    /// Create a connected bus and the receiver its deliveries arrive on.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<InboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (state, _) = watch::channel(ConnectionState::Connected);
        (
            Self {
                tx,
                filters: Arc::new(RwLock::new(Vec::new())),
                state: Arc::new(state),
            },
            rx,
        )
    }
}

#[async_trait]
impl MessageBus for ChannelBus {
    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    async fn subscribe(&self, filter: &str, _qos: Qos) -> Result<(), BusError> {
        if self.state() != ConnectionState::Connected {
            return Err(BusError::NotConnected);
        }
        self.filters.write().await.push(filter.to_string());
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, _qos: Qos) -> Result<(), BusError> {
        if self.state() != ConnectionState::Connected {
            return Err(BusError::NotConnected);
        }
        let matched = self
            .filters
            .read()
            .await
            .iter()
            .any(|f| topic_matches(f, topic));
        if matched {
            self.tx
                .send(InboundMessage::new(topic, payload))
                .await
                .map_err(|e| BusError::Publish(e.to_string()))?;
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        self.state.send_replace(ConnectionState::Disconnected);
        Ok(())
    }
}
