//! End-to-end ingestion tests over the in-process bus.
//!
//! Tests include:
//! - Sensor reading stored at its history path
//! - Alert rule present -> one notification after the write
//! - Malformed payload dropped, next message still processed
//! - Unknown topic has no side effects
//! - Re-delivery overwrites (last write wins)
//! - Alert lookup failure does not affect storage
//! - A message stuck in its alert lookup does not hold back the next one

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Notify, Semaphore};

use sensorhub_core::storage::StorageBackend;
use sensorhub_devices::{
    ChannelBus, DecodeError, InboundMessage, IngestError, IngestionPipeline, IngestionService,
    MessageBus, Qos, SensorReading, TelemetryRecord, TopicConfig, TopicRouter,
};
use sensorhub_messages::{
    AlertEvaluator, AlertRuleSource, ChannelRegistry, MemoryChannel, NotificationChannel,
};
use sensorhub_storage::{
    AlertRule, AlertRuleStore, EntityKind, HistoryKey, HistoryStore, MemoryBackend, RedbBackend,
    RedbBackendConfig,
};

const SENSOR_TOPIC: &str = "home/AA:BB:CC/sensors-data/temp1";
const SENSOR_BODY: &str = r#"{"sensorId":"temp1","timestamp":"2024-06-01T12:00:00Z","value":"23.5"}"#;

struct Harness {
    backend: Arc<dyn StorageBackend>,
    history: HistoryStore,
    rules: Arc<AlertRuleStore>,
    channel: Arc<MemoryChannel>,
    pipeline: IngestionPipeline,
}

async fn harness_with(backend: Arc<dyn StorageBackend>) -> Harness {
    let history = HistoryStore::new(backend.clone());
    let rules = Arc::new(AlertRuleStore::new(backend.clone()));
    let channel = Arc::new(MemoryChannel::new("memory"));
    let registry = Arc::new(ChannelRegistry::new());
    registry.register(channel.clone() as Arc<dyn NotificationChannel>).await;

    let router = TopicRouter::new(&TopicConfig::default()).unwrap();
    let pipeline = IngestionPipeline::new(router, history.clone())
        .with_alerts(AlertEvaluator::new(rules.clone()), registry);

    Harness {
        backend,
        history,
        rules,
        channel,
        pipeline,
    }
}

async fn harness() -> Harness {
    harness_with(Arc::new(MemoryBackend::new())).await
}

fn expected_key() -> HistoryKey {
    HistoryKey::new("AA:BB:CC", EntityKind::Sensors, "temp1", 1717243200000)
}

fn data_rows(backend: &Arc<dyn StorageBackend>) -> usize {
    backend.scan("data", "").unwrap().len()
}

/// Wait until `count` history rows exist.
async fn wait_for_rows(backend: &Arc<dyn StorageBackend>, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while data_rows(backend) < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("history rows did not appear in time");
}

/// Start the service on a channel bus subscribed to the router's filters.
async fn start_service(h: &Harness) -> (ChannelBus, watch::Sender<bool>, tokio::task::JoinHandle<usize>) {
    let (bus, inbound) = ChannelBus::new(16);
    for filter in h.pipeline.router().subscriptions() {
        bus.subscribe(&filter, Qos::AtLeastOnce).await.unwrap();
    }
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let service = IngestionService::new(h.pipeline.clone());
    let handle = tokio::spawn(async move { service.run(inbound, shutdown_rx).await });
    (bus, shutdown_tx, handle)
}

#[tokio::test]
async fn test_sensor_reading_is_stored() {
    let h = harness().await;
    let (bus, shutdown, handle) = start_service(&h).await;

    bus.publish(SENSOR_TOPIC, SENSOR_BODY.into(), Qos::AtLeastOnce)
        .await
        .unwrap();
    wait_for_rows(&h.backend, 1).await;

    let stored: SensorReading = h.history.get(&expected_key()).await.unwrap().unwrap();
    assert_eq!(stored.sensor_id, "temp1");
    assert_eq!(stored.value, "23.5");
    assert_eq!(stored.timestamp.timestamp_millis(), 1717243200000);
    assert!(h
        .backend
        .read("data", "AA:BB:CC/sensors/temp1/1717243200000")
        .unwrap()
        .is_some());
    assert_eq!(h.channel.count().await, 0);

    shutdown.send(true).unwrap();
    assert_eq!(handle.await.unwrap(), 1);
}

#[tokio::test]
async fn test_alert_rule_triggers_notification_after_write() {
    let h = harness().await;
    h.rules
        .put(&AlertRule::new("temp1", "30", "Living room"))
        .await
        .unwrap();

    let outcome = h
        .pipeline
        .process(&InboundMessage::new(SENSOR_TOPIC, SENSOR_BODY))
        .await
        .unwrap();

    let intent = outcome.notification.expect("rule should fire");
    assert_eq!(intent.sensor_id, "temp1");
    assert_eq!(intent.sensor_name, "Living room");
    assert_eq!(intent.trigger_value, "23.5");

    let delivered = h.channel.intents().await;
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].sensor_id, "temp1");
    assert!(h.history.get::<SensorReading>(&expected_key()).await.unwrap().is_some());
}

#[tokio::test]
async fn test_malformed_payload_does_not_block_next_message() {
    let h = harness().await;
    let (bus, shutdown, handle) = start_service(&h).await;

    bus.publish(SENSOR_TOPIC, b"{\"sensorId\": ".to_vec(), Qos::AtLeastOnce)
        .await
        .unwrap();
    bus.publish(SENSOR_TOPIC, SENSOR_BODY.into(), Qos::AtLeastOnce)
        .await
        .unwrap();
    wait_for_rows(&h.backend, 1).await;

    shutdown.send(true).unwrap();
    assert_eq!(handle.await.unwrap(), 2);
    assert_eq!(data_rows(&h.backend), 1);
}

#[tokio::test]
async fn test_malformed_payload_is_rejected_without_write() {
    let h = harness().await;
    let missing_id = InboundMessage::new(
        SENSOR_TOPIC,
        r#"{"timestamp":"2024-06-01T12:00:00Z","value":"23.5"}"#,
    );
    assert!(matches!(
        h.pipeline.process(&missing_id).await,
        Err(IngestError::Decode(DecodeError::Malformed(_)))
    ));

    let bad_ts = InboundMessage::new(
        SENSOR_TOPIC,
        r#"{"sensorId":"temp1","timestamp":"2024-06-01 12:00","value":"23.5"}"#,
    );
    assert!(matches!(
        h.pipeline.process(&bad_ts).await,
        Err(IngestError::Decode(DecodeError::BadTimestamp(_)))
    ));
    assert_eq!(data_rows(&h.backend), 0);
}

#[tokio::test]
async fn test_unknown_topic_has_no_side_effects() {
    let h = harness().await;
    h.rules.put(&AlertRule::new("x", "1", "")).await.unwrap();

    let message = InboundMessage::new("home/AA:BB:CC/unknown-data/x", SENSOR_BODY);
    assert!(matches!(
        h.pipeline.process(&message).await,
        Err(IngestError::UnknownTopic(_))
    ));
    h.pipeline.handle(message).await;

    assert_eq!(data_rows(&h.backend), 0);
    assert_eq!(h.channel.count().await, 0);
}

#[tokio::test]
async fn test_redelivery_overwrites_same_key() {
    let h = harness().await;
    let second = r#"{"sensorId":"temp1","timestamp":"2024-06-01T12:00:00Z","value":"24.0"}"#;

    h.pipeline
        .process(&InboundMessage::new(SENSOR_TOPIC, SENSOR_BODY))
        .await
        .unwrap();
    let outcome = h
        .pipeline
        .process(&InboundMessage::new(SENSOR_TOPIC, second))
        .await
        .unwrap();
    assert_eq!(outcome.key, expected_key());

    assert_eq!(data_rows(&h.backend), 1);
    let stored: SensorReading = h.history.get(&expected_key()).await.unwrap().unwrap();
    assert_eq!(stored.value, "24.0");
}

#[tokio::test]
async fn test_actuator_event_is_stored() {
    let h = harness().await;
    let outcome = h
        .pipeline
        .process(&InboundMessage::new(
            "home/AA:BB:CC/actuators-data/relay1",
            r#"{"actuatorId":"relay1","timestamp":"2024-06-01T12:00:00.250000Z","command":"on","value":1}"#,
        ))
        .await
        .unwrap();

    assert_eq!(
        outcome.key,
        HistoryKey::new("AA:BB:CC", EntityKind::Actuators, "relay1", 1717243200250)
    );
    assert!(matches!(outcome.record, TelemetryRecord::Actuator(ref e) if e.command == "on"));
}

struct BrokenRules;

#[async_trait]
impl AlertRuleSource for BrokenRules {
    async fn rule_for(&self, _sensor_id: &str) -> sensorhub_messages::Result<Option<AlertRule>> {
        Err(sensorhub_messages::Error::Lookup("rule store unavailable".to_string()))
    }
}

#[tokio::test]
async fn test_alert_lookup_failure_keeps_stored_record() {
    let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let history = HistoryStore::new(backend.clone());
    let router = TopicRouter::new(&TopicConfig::default()).unwrap();
    let pipeline = IngestionPipeline::new(router, history.clone()).with_alerts(
        AlertEvaluator::new(Arc::new(BrokenRules)),
        Arc::new(ChannelRegistry::new()),
    );

    let outcome = pipeline
        .process(&InboundMessage::new(SENSOR_TOPIC, SENSOR_BODY))
        .await
        .unwrap();
    assert!(outcome.notification.is_none());
    assert!(history.get::<SensorReading>(&expected_key()).await.unwrap().is_some());
}

/// Blocks lookups for one sensor until the gate is opened.
struct GatedRules {
    slow_sensor: &'static str,
    entered: Notify,
    gate: Semaphore,
}

#[async_trait]
impl AlertRuleSource for GatedRules {
    async fn rule_for(&self, sensor_id: &str) -> sensorhub_messages::Result<Option<AlertRule>> {
        if sensor_id == self.slow_sensor {
            self.entered.notify_one();
            let _permit = self.gate.acquire().await;
        }
        Ok(None)
    }
}

#[tokio::test]
async fn test_slow_alert_lookup_does_not_block_next_message() {
    let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let rules = Arc::new(GatedRules {
        slow_sensor: "slow1",
        entered: Notify::new(),
        gate: Semaphore::new(0),
    });
    let router = TopicRouter::new(&TopicConfig::default()).unwrap();
    let pipeline = IngestionPipeline::new(router, HistoryStore::new(backend.clone())).with_alerts(
        AlertEvaluator::new(rules.clone()),
        Arc::new(ChannelRegistry::new()),
    );

    let (bus, inbound) = ChannelBus::new(16);
    for filter in pipeline.router().subscriptions() {
        bus.subscribe(&filter, Qos::AtLeastOnce).await.unwrap();
    }
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let service = IngestionService::new(pipeline);
    let handle = tokio::spawn(async move { service.run(inbound, shutdown_rx).await });

    bus.publish(
        "home/AA:BB:CC/sensors-data/slow1",
        r#"{"sensorId":"slow1","timestamp":"2024-06-01T12:00:00Z","value":"1"}"#.into(),
        Qos::AtLeastOnce,
    )
    .await
    .unwrap();
    tokio::time::timeout(Duration::from_secs(5), rules.entered.notified())
        .await
        .unwrap();

    // The first message is parked in its lookup; the second still lands
    bus.publish(SENSOR_TOPIC, SENSOR_BODY.into(), Qos::AtLeastOnce)
        .await
        .unwrap();
    wait_for_rows(&backend, 2).await;
    assert!(backend
        .read("data", "AA:BB:CC/sensors/temp1/1717243200000")
        .unwrap()
        .is_some());

    rules.gate.add_permits(1);
    shutdown_tx.send(true).unwrap();
    assert_eq!(handle.await.unwrap(), 2);
}

#[tokio::test]
async fn test_pipeline_on_redb() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sensorhub.redb");
    let backend = RedbBackend::new(RedbBackendConfig::new(path.to_string_lossy())).unwrap();
    let h = harness_with(Arc::new(backend)).await;

    h.pipeline
        .process(&InboundMessage::new(SENSOR_TOPIC, SENSOR_BODY))
        .await
        .unwrap();

    let latest = h
        .history
        .latest::<SensorReading>("AA:BB:CC", EntityKind::Sensors, "temp1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.epoch_millis, 1717243200000);
    assert_eq!(latest.record.value, "23.5");
}
