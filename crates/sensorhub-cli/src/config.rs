//! Application configuration.
//!
//! Loaded from `sensorhub.toml` (or the file given with `--config`), then
//! overridden by `SENSORHUB_*` environment variables. Every field has a
//! default, so an empty or missing file is a valid configuration.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use sensorhub_core::config::{defaults, env_string, env_vars};
use sensorhub_core::storage::StorageBackend;
use sensorhub_devices::{MqttConfig, TopicConfig, TopicRouter};
use sensorhub_messages::{AlertConfig, AlertMode};
use sensorhub_storage::{available_backends, create_backend};

/// Ingestion settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(flatten)]
    pub topics: TopicConfig,

    /// Default number of entries returned by `history recent`.
    #[serde(default = "default_recent_window")]
    pub recent_window: usize,
}

fn default_recent_window() -> usize {
    defaults::RECENT_WINDOW
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            topics: TopicConfig::default(),
            recent_window: default_recent_window(),
        }
    }
}

/// Storage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `redb` or `memory`.
    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_backend() -> String {
    "redb".to_string()
}

fn default_db_path() -> String {
    defaults::DB_PATH.to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_db_path(),
        }
    }
}

impl StorageConfig {
    pub fn open(&self) -> Result<Arc<dyn StorageBackend>> {
        create_backend(&self.backend, &serde_json::json!({ "path": self.path }))
            .with_context(|| format!("Failed to open {} storage at {}", self.backend, self.path))
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
}

impl AppConfig {
    /// Load configuration.
    ///
    /// An explicitly requested file must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Path::new(defaults::CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    tracing::debug!("No {} found, using defaults", defaults::CONFIG_FILE);
                    Self::default()
                }
            }
        };
        config.apply_overrides(env_string)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply overrides from `lookup` (the environment in production).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = lookup(env_vars::MQTT_HOST) {
            self.mqtt.host = host;
        }
        if let Some(port) = lookup(env_vars::MQTT_PORT) {
            self.mqtt.port = port
                .parse()
                .with_context(|| format!("{} is not a port: {}", env_vars::MQTT_PORT, port))?;
        }
        if let Some(username) = lookup(env_vars::MQTT_USERNAME) {
            self.mqtt.username = Some(username);
        }
        if let Some(password) = lookup(env_vars::MQTT_PASSWORD) {
            self.mqtt.password = Some(password);
        }
        if let Some(prefix) = lookup(env_vars::TOPIC_PREFIX) {
            self.ingest.topics.prefix = prefix;
        }
        if let Some(path) = lookup(env_vars::DB_PATH) {
            self.storage.path = path;
        }
        if let Some(mode) = lookup(env_vars::ALERT_MODE) {
            self.alerts.mode = mode.parse::<AlertMode>()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.mqtt.host.trim().is_empty() {
            bail!("mqtt.host must not be empty");
        }
        if !available_backends().contains(&self.storage.backend.as_str()) {
            bail!(
                "Unknown storage backend {:?}; available: {}",
                self.storage.backend,
                available_backends().join(", ")
            );
        }
        self.router()?;
        Ok(())
    }

    pub fn router(&self) -> Result<TopicRouter> {
        Ok(TopicRouter::new(&self.ingest.topics)?)
    }
}
