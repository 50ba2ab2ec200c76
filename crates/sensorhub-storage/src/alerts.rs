//! Alert rule storage.
//!
//! One rule per sensor, stored at `alerts/{sensorId}`. Rules are created,
//! edited and deleted by operators; the ingestion pipeline only performs
//! point lookups.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use sensorhub_core::storage::StorageBackend;

use crate::{Error, Result};

/// Table holding alert rules.
pub const ALERTS_TABLE: &str = "alerts";

/// Operator used when rules are evaluated by comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonOperator {
    #[default]
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    Ne,
}

impl ComparisonOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }
}

impl std::str::FromStr for ComparisonOperator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gt" | ">" => Ok(Self::Gt),
            "gte" | ">=" => Ok(Self::Gte),
            "lt" | "<" => Ok(Self::Lt),
            "lte" | "<=" => Ok(Self::Lte),
            "eq" | "==" => Ok(Self::Eq),
            "ne" | "!=" => Ok(Self::Ne),
            other => Err(Error::InvalidInput(format!("Unknown operator: {}", other))),
        }
    }
}

/// Per-sensor alert configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRule {
    #[serde(alias = "SensorId")]
    pub sensor_id: String,
    /// Threshold the reading is compared against. Older records call it `value`.
    #[serde(alias = "value", alias = "Value")]
    pub comparison_value: String,
    #[serde(default, alias = "SensorName")]
    pub sensor_name: String,
    /// Only consulted in comparison mode; `gt` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<ComparisonOperator>,
}

impl AlertRule {
    pub fn new(
        sensor_id: impl Into<String>,
        comparison_value: impl Into<String>,
        sensor_name: impl Into<String>,
    ) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            comparison_value: comparison_value.into(),
            sensor_name: sensor_name.into(),
            operator: None,
        }
    }

    pub fn with_operator(mut self, operator: ComparisonOperator) -> Self {
        self.operator = Some(operator);
        self
    }

    /// Both the sensor id and the comparison value are required.
    pub fn validate(&self) -> Result<()> {
        if self.sensor_id.trim().is_empty() || self.comparison_value.trim().is_empty() {
            return Err(Error::InvalidInput(
                "sensorId and comparisonValue are required".to_string(),
            ));
        }
        if self.sensor_id.contains('/') {
            return Err(Error::InvalidInput(format!(
                "sensorId must not contain '/': {}",
                self.sensor_id
            )));
        }
        Ok(())
    }

    /// Store path, e.g. `alerts/temp1`.
    pub fn path(&self) -> String {
        format!("{}/{}", ALERTS_TABLE, self.sensor_id)
    }
}

/// CRUD access to alert rules.
#[derive(Clone)]
pub struct AlertRuleStore {
    backend: Arc<dyn StorageBackend>,
}

impl AlertRuleStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Create or replace the rule for `rule.sensor_id`.
    pub async fn put(&self, rule: &AlertRule) -> Result<()> {
        rule.validate()?;
        let bytes = serde_json::to_vec(rule)?;
        let key = rule.sensor_id.clone();
        let backend = self.backend.clone();

        tokio::task::spawn_blocking(move || backend.write(ALERTS_TABLE, &key, &bytes)).await??;
        tracing::debug!(sensor_id = %rule.sensor_id, "Alert rule saved");
        Ok(())
    }

    /// Replace the rule stored under `sensor_id`.
    ///
    /// The path parameter wins over the id inside the body, so a rule can
    /// never be written under a different key than the one being edited.
    pub async fn update(&self, sensor_id: &str, rule: AlertRule) -> Result<()> {
        let rule = AlertRule {
            sensor_id: sensor_id.to_string(),
            ..rule
        };
        self.put(&rule).await
    }

    /// Point lookup by sensor id.
    pub async fn get(&self, sensor_id: &str) -> Result<Option<AlertRule>> {
        if sensor_id.is_empty() {
            return Ok(None);
        }
        let key = sensor_id.to_string();
        let backend = self.backend.clone();

        let bytes =
            tokio::task::spawn_blocking(move || backend.read(ALERTS_TABLE, &key)).await??;
        bytes
            .map(|b| serde_json::from_slice(&b).map_err(Error::from))
            .transpose()
    }

    /// Remove a rule. Returns `false` if there was none.
    pub async fn delete(&self, sensor_id: &str) -> Result<bool> {
        let key = sensor_id.to_string();
        let backend = self.backend.clone();
        let removed =
            tokio::task::spawn_blocking(move || backend.delete(ALERTS_TABLE, &key)).await??;
        Ok(removed)
    }

    /// All rules, ordered by sensor id.
    pub async fn list(&self) -> Result<Vec<AlertRule>> {
        let backend = self.backend.clone();
        let rows = tokio::task::spawn_blocking(move || backend.scan(ALERTS_TABLE, "")).await??;

        let mut rules = Vec::with_capacity(rows.len());
        for (key, bytes) in rows {
            match serde_json::from_slice::<AlertRule>(&bytes) {
                Ok(rule) => rules.push(rule),
                Err(e) => tracing::warn!(key = %key, error = %e, "Skipping undecodable alert rule"),
            }
        }
        rules.sort_by(|a, b| a.sensor_id.cmp(&b.sensor_id));
        Ok(rules)
    }
}
