//! Command-line interface for SensorHub telemetry ingestion.

mod config;
mod shutdown;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;

use sensorhub_core::config::env_vars;
use sensorhub_devices::{IngestionPipeline, IngestionService, MessageBus, MqttBus, Qos};
use sensorhub_messages::{AlertEvaluator, ChannelRegistry, ConsoleChannel};
use sensorhub_storage::{
    AlertRule, AlertRuleStore, ComparisonOperator, EntityKind, HistoryEntry, HistoryStore,
};

use crate::config::AppConfig;

/// SensorHub - ingest device telemetry from MQTT into a local history store.
#[derive(Parser, Debug)]
#[command(name = "sensorhub")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Configuration file (default: ./sensorhub.toml if present).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Connect to the broker and ingest telemetry until interrupted.
    Serve,
    /// Publish a command to a device topic.
    Publish {
        topic: String,
        payload: String,
        /// QoS level (0, 1 or 2).
        #[arg(long, default_value = "2")]
        qos: Qos,
        /// Seconds to wait for the broker connection.
        #[arg(long, default_value_t = 10)]
        timeout: u64,
    },
    /// Query stored telemetry.
    History {
        #[command(subcommand)]
        cmd: HistoryCommand,
    },
    /// Manage alert rules.
    Alerts {
        #[command(subcommand)]
        cmd: AlertsCommand,
    },
}

#[derive(Subcommand, Debug)]
enum HistoryCommand {
    /// Every stored record of one kind for a device.
    List { device: String, kind: EntityKind },
    /// Newest record of one entity.
    Latest {
        device: String,
        kind: EntityKind,
        entity: String,
    },
    /// Newest records of one entity, oldest first.
    Recent {
        device: String,
        kind: EntityKind,
        entity: String,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Delete all records of one entity.
    Delete {
        device: String,
        kind: EntityKind,
        entity: String,
    },
}

#[derive(Subcommand, Debug)]
enum AlertsCommand {
    /// List all alert rules.
    List,
    /// Show the rule for a sensor.
    Get { sensor_id: String },
    /// Create or replace the rule for a sensor.
    Set {
        sensor_id: String,
        /// Threshold the reading is compared against.
        value: String,
        #[arg(short, long, default_value = "")]
        name: String,
        /// gt, gte, lt, lte, eq or ne (comparison mode only).
        #[arg(short, long)]
        operator: Option<ComparisonOperator>,
    },
    /// Delete the rule for a sensor.
    Delete { sensor_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = AppConfig::load(args.config.as_deref())?;

    match args.command {
        Command::Serve => serve(config).await,
        Command::Publish {
            topic,
            payload,
            qos,
            timeout,
        } => publish(&config, &topic, payload, qos, timeout).await,
        Command::History { cmd } => history(&config, cmd).await,
        Command::Alerts { cmd } => alerts(&config, cmd).await,
    }
}

fn init_logging(verbose: bool) {
    let json_logging = sensorhub_core::config::env_parse::<bool>(env_vars::LOG_JSON).unwrap_or(false);

    let default_directive = if verbose { "sensorhub=debug" } else { "sensorhub=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .compact()
            .init();
    }
}

async fn serve(config: AppConfig) -> Result<()> {
    let backend = config.storage.open()?;
    let router = config.router()?;
    let subscriptions = router.subscriptions();

    let channels = Arc::new(ChannelRegistry::new());
    channels.register(Arc::new(ConsoleChannel::new("console"))).await;
    let rules = Arc::new(AlertRuleStore::new(backend.clone()));
    let pipeline = IngestionPipeline::new(router, HistoryStore::new(backend))
        .with_alerts(AlertEvaluator::from_config(rules, &config.alerts), channels);

    let shutdown = shutdown::spawn_shutdown_watch();
    let (bus, inbound) = MqttBus::connect(&config.mqtt, subscriptions, shutdown.clone());

    tracing::info!(
        broker = %bus.broker_addr(),
        alert_mode = %config.alerts.mode,
        storage = %config.storage.path,
        "SensorHub started"
    );

    let service = IngestionService::new(pipeline);
    let processed = service.run(inbound, shutdown.clone()).await;

    if !*shutdown.borrow() {
        tracing::warn!(
            broker = %bus.broker_addr(),
            "Ingestion stopped; waiting for shutdown signal"
        );
        let mut shutdown = shutdown;
        let _ = shutdown.wait_for(|stop| *stop).await;
    }

    bus.closed().await;
    tracing::info!(messages = processed, "SensorHub stopped");
    Ok(())
}

async fn publish(config: &AppConfig, topic: &str, payload: String, qos: Qos, timeout: u64) -> Result<()> {
    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let (bus, _inbound) = MqttBus::connect(&config.mqtt, Vec::new(), stop_rx);

    tokio::time::timeout(Duration::from_secs(timeout), bus.wait_connected())
        .await
        .context("Timed out connecting to broker")??;
    let published = bus.publish(topic, payload.into_bytes(), qos).await;

    let _ = stop_tx.send(true);
    bus.closed().await;
    published?;
    println!("Published to {}", topic);
    Ok(())
}

async fn history(config: &AppConfig, cmd: HistoryCommand) -> Result<()> {
    let store = HistoryStore::new(config.storage.open()?);

    match cmd {
        HistoryCommand::List { device, kind } => {
            print_entries(&store.list_device::<Value>(&device, kind).await?)?;
        }
        HistoryCommand::Latest {
            device,
            kind,
            entity,
        } => match store.latest::<Value>(&device, kind, &entity).await? {
            Some(entry) => print_entries(std::slice::from_ref(&entry))?,
            None => bail!("No history for {}/{}/{}", device, kind, entity),
        },
        HistoryCommand::Recent {
            device,
            kind,
            entity,
            limit,
        } => {
            let limit = limit.unwrap_or(config.ingest.recent_window);
            print_entries(&store.recent::<Value>(&device, kind, &entity, limit).await?)?;
        }
        HistoryCommand::Delete {
            device,
            kind,
            entity,
        } => {
            let removed = store.delete_entity(&device, kind, &entity).await?;
            println!("Deleted {} entries", removed);
        }
    }
    Ok(())
}

fn print_entries(entries: &[HistoryEntry<Value>]) -> Result<()> {
    for entry in entries {
        let line = serde_json::json!({
            "entityId": entry.entity_id,
            "epochMillis": entry.epoch_millis,
            "record": entry.record,
        });
        println!("{}", serde_json::to_string(&line)?);
    }
    Ok(())
}

async fn alerts(config: &AppConfig, cmd: AlertsCommand) -> Result<()> {
    let store = AlertRuleStore::new(config.storage.open()?);

    match cmd {
        AlertsCommand::List => {
            for rule in store.list().await? {
                println!("{}", serde_json::to_string(&rule)?);
            }
        }
        AlertsCommand::Get { sensor_id } => match store.get(&sensor_id).await? {
            Some(rule) => println!("{}", serde_json::to_string_pretty(&rule)?),
            None => bail!("No alert rule for {}", sensor_id),
        },
        AlertsCommand::Set {
            sensor_id,
            value,
            name,
            operator,
        } => {
            let mut rule = AlertRule::new(sensor_id, value, name);
            rule.operator = operator;
            store.put(&rule).await?;
            println!("Saved alert rule for {}", rule.sensor_id);
        }
        AlertsCommand::Delete { sensor_id } => {
            if !store.delete(&sensor_id).await? {
                bail!("No alert rule for {}", sensor_id);
            }
            println!("Deleted alert rule for {}", sensor_id);
        }
    }
    Ok(())
}
