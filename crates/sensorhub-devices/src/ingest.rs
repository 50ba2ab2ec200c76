//! Ingestion pipeline and service.
//!
//! Per message: classify the topic, decode the payload, append the record
//! to history and, for sensor readings, evaluate alerts. Each message is
//! handled on its own task, and every failure stays with that message.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use sensorhub_messages::{AlertEvaluator, ChannelRegistry, NotificationIntent};
use sensorhub_storage::{HistoryKey, HistoryStore};

use crate::bus::InboundMessage;
use crate::payload;
use crate::telemetry::TelemetryRecord;
use crate::topic::TopicRouter;
use crate::{DecodeError, IngestError};

/// What processing one message produced.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub key: HistoryKey,
    pub record: TelemetryRecord,
    /// Set when an alert rule fired for a sensor reading.
    pub notification: Option<NotificationIntent>,
}

/// Alert evaluation plus the channels triggered intents go to.
#[derive(Clone)]
struct Alerting {
    evaluator: AlertEvaluator,
    channels: Arc<ChannelRegistry>,
}

/// Stateless per-message processing chain.
#[derive(Clone)]
pub struct IngestionPipeline {
    router: TopicRouter,
    history: HistoryStore,
    alerting: Option<Alerting>,
}

impl IngestionPipeline {
    pub fn new(router: TopicRouter, history: HistoryStore) -> Self {
        Self {
            router,
            history,
            alerting: None,
        }
    }

    /// Evaluate alerts for sensor readings and dispatch triggered intents to `channels`.
    pub fn with_alerts(mut self, evaluator: AlertEvaluator, channels: Arc<ChannelRegistry>) -> Self {
        self.alerting = Some(Alerting {
            evaluator,
            channels,
        });
        self
    }

    pub fn router(&self) -> &TopicRouter {
        &self.router
    }

    /// Run one message through the pipeline.
    ///
    /// The store write completes before alerts are evaluated. An alert
    /// lookup failure is logged and leaves `notification` empty; it is not
    /// an error of the message.
    pub async fn process(&self, message: &InboundMessage) -> Result<IngestOutcome, IngestError> {
        let topic = self.router.classify(&message.topic);
        let Some(kind) = topic.message_class.entity_kind() else {
            return Err(IngestError::UnknownTopic(topic.raw_topic));
        };

        let record = payload::decode(topic.message_class, &message.payload)?;
        let key = HistoryKey::new(
            topic.device_address.as_str(),
            kind,
            record.entity_id(),
            record.epoch_millis(),
        );

        match &record {
            TelemetryRecord::Sensor(reading) => self.history.append(&key, reading).await?,
            TelemetryRecord::Actuator(event) => self.history.append(&key, event).await?,
        }
        debug!(
            category = "ingest",
            topic = %message.topic,
            device = %key.device_address,
            entity_id = %key.entity_id,
            epoch_millis = key.epoch_millis,
            "Stored telemetry"
        );

        let notification = match (&record, &self.alerting) {
            (TelemetryRecord::Sensor(reading), Some(alerting)) => {
                self.notify(alerting, &key, &reading.value).await
            }
            _ => None,
        };

        Ok(IngestOutcome {
            key,
            record,
            notification,
        })
    }

    async fn notify(
        &self,
        alerting: &Alerting,
        key: &HistoryKey,
        value: &str,
    ) -> Option<NotificationIntent> {
        match alerting
            .evaluator
            .evaluate(&key.entity_id, &key.device_address, value)
            .await
        {
            Ok(Some(intent)) => {
                let delivered = alerting.channels.dispatch(&intent).await;
                info!(
                    category = "alert",
                    device = %key.device_address,
                    entity_id = %key.entity_id,
                    epoch_millis = key.epoch_millis,
                    channels = delivered,
                    "Notification triggered"
                );
                Some(intent)
            }
            Ok(None) => None,
            Err(e) => {
                error!(
                    category = "alert",
                    device = %key.device_address,
                    entity_id = %key.entity_id,
                    error = %e,
                    "Alert rule lookup failed"
                );
                None
            }
        }
    }

    /// Process a message and log the result. Never fails.
    pub async fn handle(&self, message: InboundMessage) {
        let Err(e) = self.process(&message).await else {
            return;
        };
        match e {
            IngestError::UnknownTopic(_) => {
                warn!(category = "ingest", topic = %message.topic, "Unknown topic, message dropped")
            }
            IngestError::Decode(DecodeError::BadTimestamp(raw)) => error!(
                category = "ingest",
                topic = %message.topic,
                timestamp = %raw,
                "Bad timestamp, message dropped"
            ),
            IngestError::Decode(e) => {
                error!(category = "ingest", topic = %message.topic, error = %e, "Decode failed, message dropped")
            }
            IngestError::Store(e) => {
                error!(category = "ingest", topic = %message.topic, error = %e, "History write failed")
            }
        }
    }
}

/// Consumes inbound messages and processes each on its own task.
pub struct IngestionService {
    pipeline: Arc<IngestionPipeline>,
}

impl IngestionService {
    pub fn new(pipeline: IngestionPipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }

    pub fn pipeline(&self) -> Arc<IngestionPipeline> {
        self.pipeline.clone()
    }

    /// Run until the inbound channel closes or `shutdown` flips to `true`.
    ///
    /// Returns the number of messages dispatched. Tasks still in flight at
    /// that point are left to finish on their own.
    pub async fn run(
        &self,
        mut inbound: mpsc::Receiver<InboundMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) -> usize {
        let mut dispatched = 0usize;
        info!(category = "ingest", "Ingestion service started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(category = "ingest", "Ingestion service stopping");
                        break;
                    }
                }
                message = inbound.recv() => {
                    let Some(message) = message else {
                        info!(category = "ingest", "Inbound channel closed");
                        break;
                    };
                    dispatched += 1;
                    let pipeline = self.pipeline.clone();
                    tokio::spawn(async move { pipeline.handle(message).await });
                }
            }
        }

        dispatched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topic::TopicConfig;
    use sensorhub_storage::MemoryBackend;

    fn pipeline() -> IngestionPipeline {
        let router = TopicRouter::new(&TopicConfig::default()).unwrap();
        IngestionPipeline::new(router, HistoryStore::new(Arc::new(MemoryBackend::new())))
    }

    #[tokio::test]
    async fn test_actuator_event_stored_without_alerting() {
        let pipeline = pipeline();
        let message = InboundMessage::new(
            "home/AA/actuators-data/relay1",
            r#"{"actuatorId":"relay1","timestamp":"2024-06-01T12:00:00Z","command":"on","value":1}"#,
        );

        let outcome = pipeline.process(&message).await.unwrap();
        assert_eq!(outcome.key.path(), "data/AA/actuators/relay1/1717243200000");
        assert!(outcome.notification.is_none());
    }

    #[tokio::test]
    async fn test_unknown_topic() {
        let pipeline = pipeline();
        let message = InboundMessage::new("home/AA/status", "{}");
        assert!(matches!(
            pipeline.process(&message).await,
            Err(IngestError::UnknownTopic(t)) if t == "home/AA/status"
        ));
        // handle() swallows it
        pipeline.handle(message).await;
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let service = IngestionService::new(pipeline());
        let (_tx, rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move { service.run(rx, shutdown_rx).await });
        shutdown_tx.send(true).unwrap();
        assert_eq!(handle.await.unwrap(), 0);
    }
}
