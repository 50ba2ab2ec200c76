//! Telemetry history store.
//!
//! Records are persisted at `data/{device}/{sensors|actuators}/{entity}/{epoch_millis}`.
//! The epoch-millis segment is the only ordering key. Two records for the
//! same entity carrying the same millisecond collide and the later write
//! replaces the earlier one; the store offers no multi-value keys, so this
//! is documented behaviour rather than something the adapter works around.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use sensorhub_core::storage::StorageBackend;

use crate::{Error, Result};

/// Table (top-level path segment) holding all telemetry history.
pub const HISTORY_TABLE: &str = "data";

/// Kind of entity a history entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Sensors,
    Actuators,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sensors => "sensors",
            Self::Actuators => "actuators",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sensors" | "sensor" => Ok(Self::Sensors),
            "actuators" | "actuator" => Ok(Self::Actuators),
            other => Err(Error::InvalidInput(format!("Unknown entity kind: {}", other))),
        }
    }
}

/// Fully-qualified location of one history entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HistoryKey {
    pub device_address: String,
    pub kind: EntityKind,
    pub entity_id: String,
    pub epoch_millis: i64,
}

impl HistoryKey {
    pub fn new(
        device_address: impl Into<String>,
        kind: EntityKind,
        entity_id: impl Into<String>,
        epoch_millis: i64,
    ) -> Self {
        Self {
            device_address: device_address.into(),
            kind,
            entity_id: entity_id.into(),
            epoch_millis,
        }
    }

    /// Key inside the history table.
    fn table_key(&self) -> String {
        format!(
            "{}{}",
            entity_prefix(&self.device_address, self.kind, &self.entity_id),
            self.epoch_millis
        )
    }

    /// Full store path, e.g. `data/AA:BB:CC/sensors/temp1/1717243200000`.
    pub fn path(&self) -> String {
        format!("{}/{}", HISTORY_TABLE, self.table_key())
    }

    fn validate(&self) -> Result<()> {
        validate_segment("device address", &self.device_address)?;
        validate_segment("entity id", &self.entity_id)
    }
}

impl fmt::Display for HistoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// A stored record together with the key it was found under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry<T> {
    pub entity_id: String,
    pub epoch_millis: i64,
    pub record: T,
}

fn kind_prefix(device_address: &str, kind: EntityKind) -> String {
    format!("{}/{}/", device_address, kind.as_str())
}

fn entity_prefix(device_address: &str, kind: EntityKind, entity_id: &str) -> String {
    format!("{}{}/", kind_prefix(device_address, kind), entity_id)
}

/// Path segments must be non-empty and must not introduce extra levels.
fn validate_segment(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::InvalidInput(format!("{} must not be empty", what)));
    }
    if value.contains('/') {
        return Err(Error::InvalidInput(format!(
            "{} must not contain '/': {}",
            what, value
        )));
    }
    Ok(())
}

/// Split `{entity}/{millis}` (relative to a kind prefix) into its parts.
fn parse_entity_key(rest: &str) -> Option<(&str, i64)> {
    let (entity, millis) = rest.split_once('/')?;
    if millis.contains('/') {
        return None;
    }
    Some((entity, millis.parse().ok()?))
}

/// Append-only writer and reader for per-device telemetry history.
///
/// Backend calls are synchronous, so they run on the blocking pool to keep
/// the ingestion tasks from stalling the runtime.
#[derive(Clone)]
pub struct HistoryStore {
    backend: Arc<dyn StorageBackend>,
}

impl HistoryStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Persist `record` at the path described by `key`.
    ///
    /// An existing entry at the same path is replaced (last write wins).
    pub async fn append<T: Serialize>(&self, key: &HistoryKey, record: &T) -> Result<()> {
        key.validate()?;
        let bytes = serde_json::to_vec(record)?;
        let table_key = key.table_key();
        let backend = self.backend.clone();

        tokio::task::spawn_blocking(move || backend.write(HISTORY_TABLE, &table_key, &bytes))
            .await??;
        Ok(())
    }

    /// Read the entry stored exactly at `key`.
    pub async fn get<T: DeserializeOwned>(&self, key: &HistoryKey) -> Result<Option<T>> {
        key.validate()?;
        let table_key = key.table_key();
        let backend = self.backend.clone();

        let bytes =
            tokio::task::spawn_blocking(move || backend.read(HISTORY_TABLE, &table_key)).await??;
        bytes
            .map(|b| serde_json::from_slice(&b).map_err(Error::from))
            .transpose()
    }

    /// All entries of one entity, oldest first.
    pub async fn entity_history<T: DeserializeOwned>(
        &self,
        device_address: &str,
        kind: EntityKind,
        entity_id: &str,
    ) -> Result<Vec<HistoryEntry<T>>> {
        validate_segment("device address", device_address)?;
        validate_segment("entity id", entity_id)?;
        let prefix = kind_prefix(device_address, kind);
        let mut entries = self.scan_kind::<T>(prefix, Some(entity_id)).await?;
        entries.sort_by_key(|e| e.epoch_millis);
        Ok(entries)
    }

    /// Every entry of one kind for a device, grouped by entity and ordered by time.
    pub async fn list_device<T: DeserializeOwned>(
        &self,
        device_address: &str,
        kind: EntityKind,
    ) -> Result<Vec<HistoryEntry<T>>> {
        validate_segment("device address", device_address)?;
        let prefix = kind_prefix(device_address, kind);
        let mut entries = self.scan_kind::<T>(prefix, None).await?;
        entries.sort_by(|a, b| {
            a.entity_id
                .cmp(&b.entity_id)
                .then(a.epoch_millis.cmp(&b.epoch_millis))
        });
        Ok(entries)
    }

    /// Newest entry of one entity.
    pub async fn latest<T: DeserializeOwned>(
        &self,
        device_address: &str,
        kind: EntityKind,
        entity_id: &str,
    ) -> Result<Option<HistoryEntry<T>>> {
        let mut entries = self
            .entity_history::<T>(device_address, kind, entity_id)
            .await?;
        Ok(entries.pop())
    }

    /// Up to `limit` newest entries of one entity, oldest first.
    pub async fn recent<T: DeserializeOwned>(
        &self,
        device_address: &str,
        kind: EntityKind,
        entity_id: &str,
        limit: usize,
    ) -> Result<Vec<HistoryEntry<T>>> {
        let mut entries = self
            .entity_history::<T>(device_address, kind, entity_id)
            .await?;
        let skip = entries.len().saturating_sub(limit);
        Ok(entries.split_off(skip))
    }

    /// Delete the whole history of one entity, returning the number of entries removed.
    pub async fn delete_entity(
        &self,
        device_address: &str,
        kind: EntityKind,
        entity_id: &str,
    ) -> Result<usize> {
        validate_segment("device address", device_address)?;
        validate_segment("entity id", entity_id)?;
        let prefix = entity_prefix(device_address, kind, entity_id);
        let backend = self.backend.clone();

        let removed =
            tokio::task::spawn_blocking(move || backend.delete_prefix(HISTORY_TABLE, &prefix))
                .await??;
        Ok(removed)
    }

    async fn scan_kind<T: DeserializeOwned>(
        &self,
        prefix: String,
        entity_filter: Option<&str>,
    ) -> Result<Vec<HistoryEntry<T>>> {
        let scan_prefix = match entity_filter {
            Some(entity) => format!("{}{}/", prefix, entity),
            None => prefix.clone(),
        };
        let backend = self.backend.clone();
        let rows =
            tokio::task::spawn_blocking(move || backend.scan(HISTORY_TABLE, &scan_prefix))
                .await??;

        let mut entries = Vec::with_capacity(rows.len());
        for (key, bytes) in rows {
            let Some((entity, millis)) = key.strip_prefix(&prefix).and_then(parse_entity_key)
            else {
                tracing::warn!(key = %key, "Skipping history key with unexpected layout");
                continue;
            };
            match serde_json::from_slice::<T>(&bytes) {
                Ok(record) => entries.push(HistoryEntry {
                    entity_id: entity.to_string(),
                    epoch_millis: millis,
                    record,
                }),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Skipping undecodable history entry");
                }
            }
        }
        Ok(entries)
    }
}
