//! Alert evaluation for incoming sensor readings.
//!
//! The evaluator performs a single point lookup of the rule configured for
//! a sensor and decides whether a [`NotificationIntent`] should be emitted.
//! Delivery is left to [`ChannelRegistry`](crate::ChannelRegistry).

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use sensorhub_storage::{AlertRule, AlertRuleStore, ComparisonOperator};

use crate::{Error, NotificationIntent, Result};

/// Read-only access to alert rules, keyed by sensor id.
#[async_trait]
pub trait AlertRuleSource: Send + Sync {
    async fn rule_for(&self, sensor_id: &str) -> Result<Option<AlertRule>>;
}

#[async_trait]
impl AlertRuleSource for AlertRuleStore {
    async fn rule_for(&self, sensor_id: &str) -> Result<Option<AlertRule>> {
        Ok(self.get(sensor_id).await?)
    }
}

/// How a found rule is turned into a trigger decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertMode {
    /// A rule existing for the sensor is the trigger. The reading is not inspected.
    #[default]
    Presence,
    /// The reading is compared against the rule's `comparisonValue`.
    Comparison,
}

impl FromStr for AlertMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "presence" => Ok(Self::Presence),
            "comparison" => Ok(Self::Comparison),
            other => Err(Error::InvalidConfiguration(format!(
                "Unknown alert mode: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for AlertMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Presence => write!(f, "presence"),
            Self::Comparison => write!(f, "comparison"),
        }
    }
}

/// Alert evaluation settings (`[alerts]` in the config file).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertConfig {
    #[serde(default)]
    pub mode: AlertMode,
}

/// Decides whether a sensor reading should raise a notification.
#[derive(Clone)]
pub struct AlertEvaluator {
    rules: Arc<dyn AlertRuleSource>,
    mode: AlertMode,
}

impl AlertEvaluator {
    pub fn new(rules: Arc<dyn AlertRuleSource>) -> Self {
        Self {
            rules,
            mode: AlertMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: AlertMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn from_config(rules: Arc<dyn AlertRuleSource>, config: &AlertConfig) -> Self {
        Self::new(rules).with_mode(config.mode)
    }

    pub fn mode(&self) -> AlertMode {
        self.mode
    }

    /// Evaluate a reading from `sensor_id` on `device_address`.
    ///
    /// `Ok(None)` means no rule matched. Lookup failures are returned so the
    /// caller can log them; they never undo a write that already happened.
    pub async fn evaluate(
        &self,
        sensor_id: &str,
        device_address: &str,
        value: &str,
    ) -> Result<Option<NotificationIntent>> {
        let Some(rule) = self.rules.rule_for(sensor_id).await? else {
            return Ok(None);
        };

        let triggered = match self.mode {
            AlertMode::Presence => true,
            AlertMode::Comparison => {
                let operator = rule.operator.unwrap_or_default();
                match compare(operator, value, &rule.comparison_value) {
                    Some(hit) => hit,
                    None => {
                        tracing::warn!(
                            category = "alert",
                            sensor_id = %sensor_id,
                            value = %value,
                            threshold = %rule.comparison_value,
                            operator = operator.symbol(),
                            "Reading not comparable with rule threshold"
                        );
                        false
                    }
                }
            }
        };

        if !triggered {
            return Ok(None);
        }

        tracing::info!(
            category = "alert",
            sensor_id = %sensor_id,
            device = %device_address,
            value = %value,
            "Alert triggered"
        );
        Ok(Some(NotificationIntent::new(
            sensor_id,
            rule.sensor_name,
            value,
            device_address,
        )))
    }
}

/// Compare `value` against `threshold`. `None` when the two can't be compared.
fn compare(operator: ComparisonOperator, value: &str, threshold: &str) -> Option<bool> {
    let numeric = value
        .trim()
        .parse::<f64>()
        .ok()
        .zip(threshold.trim().parse::<f64>().ok());

    match (numeric, operator) {
        (Some((v, t)), op) => Some(match op {
            ComparisonOperator::Gt => v > t,
            ComparisonOperator::Gte => v >= t,
            ComparisonOperator::Lt => v < t,
            ComparisonOperator::Lte => v <= t,
            ComparisonOperator::Eq => v == t,
            ComparisonOperator::Ne => v != t,
        }),
        (None, ComparisonOperator::Eq) => Some(value == threshold),
        (None, ComparisonOperator::Ne) => Some(value != threshold),
        (None, _) => None,
    }
}
