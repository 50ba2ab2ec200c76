//! MQTT bus connection manager built on `rumqttc`.
//!
//! One persistent connection per process. The event loop runs on its own
//! task: it tracks the connection state, (re)subscribes on every ConnAck and
//! forwards publishes to the ingestion receiver. Whether a lost or refused
//! connection is retried is decided by [`ReconnectPolicy`].
//!
//! A publish completes once the broker has acknowledged it for its QoS:
//! written to the socket for QoS 0, PUBACK for QoS 1, PUBCOMP for QoS 2.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use sensorhub_core::config::defaults;

use crate::bus::{ConnectionState, InboundMessage, MessageBus};
use crate::BusError;

/// MQTT QoS level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Qos {
    AtMostOnce = 0,
    #[default]
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl From<Qos> for rumqttc::QoS {
    fn from(qos: Qos) -> Self {
        match qos {
            Qos::AtMostOnce => rumqttc::QoS::AtMostOnce,
            Qos::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            Qos::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

impl std::str::FromStr for Qos {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "0" | "at_most_once" => Ok(Self::AtMostOnce),
            "1" | "at_least_once" => Ok(Self::AtLeastOnce),
            "2" | "exactly_once" => Ok(Self::ExactlyOnce),
            other => Err(BusError::Publish(format!("invalid QoS: {}", other))),
        }
    }
}

/// What to do when the broker refuses or drops the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconnectPolicy {
    /// Log the failure and stay disconnected.
    #[default]
    Never,
    /// Retry with exponential backoff, doubling from `initial_ms` up to `max_ms`.
    Backoff {
        #[serde(default = "default_backoff_initial")]
        initial_ms: u64,
        #[serde(default = "default_backoff_max")]
        max_ms: u64,
    },
}

fn default_backoff_initial() -> u64 {
    defaults::RECONNECT_INITIAL_MS
}

fn default_backoff_max() -> u64 {
    defaults::RECONNECT_MAX_MS
}

impl ReconnectPolicy {
    pub fn backoff() -> Self {
        Self::Backoff {
            initial_ms: default_backoff_initial(),
            max_ms: default_backoff_max(),
        }
    }

    /// Delay before retry number `attempt` (starting at 0), or `None` to give up.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        match *self {
            Self::Never => None,
            Self::Backoff { initial_ms, max_ms } => {
                let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
                Some(Duration::from_millis(
                    initial_ms.saturating_mul(factor).min(max_ms.max(initial_ms)),
                ))
            }
        }
    }
}

/// Broker connection settings (`[mqtt]` in the config file).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Random `sensorhub-{uuid}` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Keep-alive interval in seconds.
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    #[serde(default = "default_clean_session")]
    pub clean_session: bool,

    /// Time allowed for the broker to acknowledge a connection.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Time allowed for the broker to acknowledge a publish.
    #[serde(default = "default_publish_timeout")]
    pub publish_timeout_secs: u64,

    /// QoS used for the telemetry subscriptions.
    #[serde(default)]
    pub subscribe_qos: Qos,

    /// Capacity of the client request queue and the inbound channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

fn default_host() -> String {
    defaults::MQTT_HOST.to_string()
}

fn default_port() -> u16 {
    defaults::MQTT_PORT
}

fn default_keep_alive() -> u64 {
    defaults::MQTT_KEEP_ALIVE_SECS
}

fn default_clean_session() -> bool {
    true
}

fn default_connection_timeout() -> u64 {
    defaults::MQTT_CONNECTION_TIMEOUT_SECS
}

fn default_publish_timeout() -> u64 {
    defaults::MQTT_PUBLISH_TIMEOUT_SECS
}

fn default_channel_capacity() -> usize {
    defaults::MQTT_CHANNEL_CAPACITY
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            client_id: None,
            username: None,
            password: None,
            keep_alive_secs: default_keep_alive(),
            clean_session: default_clean_session(),
            connection_timeout_secs: default_connection_timeout(),
            publish_timeout_secs: default_publish_timeout(),
            subscribe_qos: Qos::default(),
            channel_capacity: default_channel_capacity(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl MqttConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn broker_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn client_id(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| format!("sensorhub-{}", Uuid::new_v4()))
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id(), &self.host, self.port);
        options.set_keep_alive(Duration::from_secs(self.keep_alive_secs.max(1)));
        options.set_clean_session(self.clean_session);
        if let (Some(user), Some(pass)) = (&self.username, &self.password) {
            options.set_credentials(user, pass);
        }
        options
    }
}

type AckResult = Result<(), BusError>;

/// Publishes waiting for the broker.
///
/// Requests enter `queued` in the order they were handed to the client, which
/// is the order the event loop writes them. Once written they are keyed by
/// packet id until the matching acknowledgement arrives.
#[derive(Default)]
struct PendingAcks {
    queued: VecDeque<(Qos, oneshot::Sender<AckResult>)>,
    inflight: HashMap<u16, (Qos, oneshot::Sender<AckResult>)>,
    /// Packet ids the event loop will write again after a reconnect.
    replayed: Vec<u16>,
}

impl PendingAcks {
    fn on_outgoing(&mut self, pkid: u16) {
        if let Some(pos) = self.replayed.iter().position(|id| *id == pkid) {
            self.replayed.swap_remove(pos);
            return;
        }
        let Some((qos, waiter)) = self.queued.pop_front() else {
            return;
        };
        match qos {
            Qos::AtMostOnce => {
                let _ = waiter.send(Ok(()));
            }
            _ => {
                self.inflight.insert(pkid, (qos, waiter));
            }
        }
    }

    fn on_ack(&mut self, pkid: u16, qos: Qos) {
        if self.inflight.get(&pkid).is_some_and(|(expected, _)| *expected == qos) {
            if let Some((_, waiter)) = self.inflight.remove(&pkid) {
                let _ = waiter.send(Ok(()));
            }
        }
    }

    /// Fail every written but unacknowledged publish.
    fn on_connection_lost(&mut self, reason: &str) {
        for (pkid, (_, waiter)) in self.inflight.drain() {
            self.replayed.push(pkid);
            let _ = waiter.send(Err(BusError::Publish(format!("connection lost: {}", reason))));
        }
    }
}

/// Connection to an MQTT broker.
#[derive(Clone)]
pub struct MqttBus {
    client: AsyncClient,
    state: Arc<watch::Sender<ConnectionState>>,
    pending: Arc<Mutex<PendingAcks>>,
    publish_timeout: Duration,
    stopped: watch::Receiver<()>,
    broker_addr: String,
}

impl MqttBus {
    /// Start connecting to the broker.
    ///
    /// Returns immediately; the connection is driven by a background task
    /// that stops when `shutdown` flips to `true`. Inbound publishes on any
    /// of `subscriptions` arrive on the returned receiver, which closes when
    /// the task ends.
    pub fn connect(
        config: &MqttConfig,
        subscriptions: Vec<String>,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, mpsc::Receiver<InboundMessage>) {
        let capacity = config.channel_capacity.max(1);
        let (client, eventloop) = AsyncClient::new(config.options(), capacity);
        let (tx, rx) = mpsc::channel(capacity);
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let (stopped_tx, stopped) = watch::channel(());

        let bus = Self {
            client,
            state: Arc::new(state),
            pending: Arc::new(Mutex::new(PendingAcks::default())),
            publish_timeout: Duration::from_secs(config.publish_timeout_secs.max(1)),
            stopped,
            broker_addr: config.broker_addr(),
        };

        info!(category = "bus", broker = %bus.broker_addr, "Connecting to MQTT broker");
        let driver = EventLoopDriver {
            client: bus.client.clone(),
            state: bus.state.clone(),
            pending: bus.pending.clone(),
            _stopped: stopped_tx,
            broker_addr: bus.broker_addr.clone(),
            subscriptions,
            subscribe_qos: config.subscribe_qos,
            reconnect: config.reconnect,
            connect_timeout: Duration::from_secs(config.connection_timeout_secs.max(1)),
            tx,
        };
        tokio::spawn(driver.run(eventloop, shutdown));

        (bus, rx)
    }

    pub fn broker_addr(&self) -> &str {
        &self.broker_addr
    }

    /// Wait until the event loop task has finished, including sending
    /// DISCONNECT after a shutdown.
    pub async fn closed(&self) {
        let mut stopped = self.stopped.clone();
        while stopped.changed().await.is_ok() {}
    }

    /// Wait until the connection is up or has definitively failed.
    pub async fn wait_connected(&self) -> Result<(), BusError> {
        let mut changes = self.state.subscribe();
        loop {
            match *changes.borrow_and_update() {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Disconnected => {
                    return Err(BusError::Connect(format!(
                        "not connected to {}",
                        self.broker_addr
                    )))
                }
                ConnectionState::Connecting => {}
            }
            changes
                .changed()
                .await
                .map_err(|e| BusError::Connect(e.to_string()))?;
        }
    }
}

#[async_trait]
impl MessageBus for MqttBus {
    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    async fn subscribe(&self, filter: &str, qos: Qos) -> Result<(), BusError> {
        if self.state() != ConnectionState::Connected {
            return Err(BusError::NotConnected);
        }
        self.client
            .subscribe(filter, qos.into())
            .await
            .map_err(|e| BusError::Subscribe(e.to_string()))
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: Qos) -> Result<(), BusError> {
        if self.state() != ConnectionState::Connected {
            warn!(category = "bus", topic = %topic, "Publish attempted while disconnected");
            return Err(BusError::NotConnected);
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        {
            // Held across try_publish so queue order matches request order
            let mut pending = self.pending.lock();
            self.client
                .try_publish(topic, qos.into(), false, payload)
                .map_err(|e| {
                    error!(category = "bus", topic = %topic, error = %e, "Publish failed");
                    BusError::Publish(e.to_string())
                })?;
            pending.queued.push_back((qos, ack_tx));
        }

        let result = match tokio::time::timeout(self.publish_timeout, ack_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BusError::Publish("event loop stopped".to_string())),
            Err(_) => Err(BusError::Publish(format!(
                "no acknowledgement within {}s",
                self.publish_timeout.as_secs()
            ))),
        };
        if let Err(e) = &result {
            error!(category = "bus", topic = %topic, error = %e, "Publish failed");
        }
        result
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        let result = self
            .client
            .disconnect()
            .await
            .map_err(|e| BusError::Connect(e.to_string()));
        self.state.send_replace(ConnectionState::Disconnected);
        result
    }
}

const DISCONNECT_FLUSH: Duration = Duration::from_secs(2);

/// Owns the event loop task's state.
struct EventLoopDriver {
    client: AsyncClient,
    state: Arc<watch::Sender<ConnectionState>>,
    pending: Arc<Mutex<PendingAcks>>,
    /// Dropped when the task ends, which wakes [`MqttBus::closed`].
    _stopped: watch::Sender<()>,
    broker_addr: String,
    subscriptions: Vec<String>,
    subscribe_qos: Qos,
    reconnect: ReconnectPolicy,
    connect_timeout: Duration,
    tx: mpsc::Sender<InboundMessage>,
}

impl EventLoopDriver {
    async fn run(self, mut eventloop: EventLoop, mut shutdown: watch::Receiver<bool>) {
        let mut attempt: u32 = 0;
        let mut closing = false;
        let mut link_up = false;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let connected = *self.state.borrow() == ConnectionState::Connected;
            let polled = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                polled = Self::poll(&mut eventloop, connected, self.connect_timeout) => polled,
            };

            match polled {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    attempt = 0;
                    link_up = true;
                    self.state.send_replace(ConnectionState::Connected);
                    info!(category = "bus", broker = %self.broker_addr, "Connected to MQTT broker");
                    self.subscribe_all();
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let message = InboundMessage::new(publish.topic, publish.payload.to_vec());
                    if self.tx.send(message).await.is_err() {
                        debug!(category = "bus", "Inbound receiver dropped, stopping event loop");
                        break;
                    }
                }
                Ok(Event::Incoming(Packet::PubAck(ack))) => {
                    self.pending.lock().on_ack(ack.pkid, Qos::AtLeastOnce);
                }
                Ok(Event::Incoming(Packet::PubComp(comp))) => {
                    self.pending.lock().on_ack(comp.pkid, Qos::ExactlyOnce);
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!(category = "bus", broker = %self.broker_addr, "Broker sent disconnect");
                    link_up = false;
                    self.state.send_replace(ConnectionState::Disconnected);
                }
                Ok(Event::Outgoing(Outgoing::Publish(pkid))) => self.pending.lock().on_outgoing(pkid),
                Ok(Event::Outgoing(Outgoing::Disconnect)) => closing = true,
                Ok(_) => {}
                Err(reason) if closing => {
                    debug!(category = "bus", error = %reason, "Connection closed after disconnect");
                    link_up = false;
                    break;
                }
                Err(reason) => {
                    link_up = false;
                    self.pending.lock().on_connection_lost(&reason);
                    self.state.send_replace(ConnectionState::Disconnected);
                    let Some(delay) = self.reconnect.delay(attempt) else {
                        error!(
                            category = "bus",
                            broker = %self.broker_addr,
                            error = %reason,
                            "MQTT connection failed, not retrying"
                        );
                        break;
                    };
                    attempt = attempt.saturating_add(1);
                    warn!(
                        category = "bus",
                        broker = %self.broker_addr,
                        error = %reason,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "MQTT connection failed, retrying"
                    );
                    tokio::select! {
                        _ = shutdown.changed() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                    self.state.send_replace(ConnectionState::Connecting);
                }
            }
        }

        if link_up && !closing {
            self.send_disconnect(&mut eventloop).await;
        }
        // Dropping the waiters fails any publish still in progress
        *self.pending.lock() = PendingAcks::default();
        self.state.send_replace(ConnectionState::Disconnected);
        info!(category = "bus", broker = %self.broker_addr, "MQTT event loop stopped");
    }

    /// Queue DISCONNECT and keep polling until it has been written.
    async fn send_disconnect(&self, eventloop: &mut EventLoop) {
        if let Err(e) = self.client.try_disconnect() {
            debug!(category = "bus", error = %e, "Could not queue disconnect");
            return;
        }
        let flush = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        if tokio::time::timeout(DISCONNECT_FLUSH, flush).await.is_err() {
            debug!(category = "bus", broker = %self.broker_addr, "Disconnect not flushed in time");
        }
    }

    /// Poll once. While not connected the poll is bounded by the connection timeout.
    async fn poll(
        eventloop: &mut EventLoop,
        connected: bool,
        timeout: Duration,
    ) -> Result<Event, String> {
        if connected {
            return eventloop.poll().await.map_err(|e| e.to_string());
        }
        match tokio::time::timeout(timeout, eventloop.poll()).await {
            Ok(polled) => polled.map_err(|e| e.to_string()),
            Err(_) => Err(format!("no ConnAck within {}s", timeout.as_secs())),
        }
    }

    fn subscribe_all(&self) {
        for filter in &self.subscriptions {
            // try_subscribe: this task is the one draining the request queue
            match self.client.try_subscribe(filter.as_str(), self.subscribe_qos.into()) {
                Ok(()) => info!(category = "bus", filter = %filter, "Subscribed"),
                Err(e) => error!(category = "bus", filter = %filter, error = %e, "Subscribe failed"),
            }
        }
    }
}
