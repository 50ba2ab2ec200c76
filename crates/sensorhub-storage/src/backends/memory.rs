//! In-memory storage backend.
//!
//! Keeps every table in an ordered map so prefix scans behave like redb
//! range scans. Nothing survives a restart.

use parking_lot::RwLock;
use sensorhub_core::storage::{Result, StorageBackend};
use std::collections::BTreeMap;

/// Ordered in-memory backend, mainly used in tests and for degraded runs
/// without a database file.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: RwLock<BTreeMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys stored in a table.
    pub fn len(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, |t| t.len())
    }

    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }
}

impl StorageBackend for MemoryBackend {
    fn write(&self, table: &str, key: &str, value: &[u8]) -> Result<()> {
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn read(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .tables
            .read()
            .get(table)
            .and_then(|t| t.get(key).cloned()))
    }

    fn delete(&self, table: &str, key: &str) -> Result<bool> {
        Ok(self
            .tables
            .write()
            .get_mut(table)
            .map(|t| t.remove(key).is_some())
            .unwrap_or(false))
    }

    fn scan(&self, table: &str, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let tables = self.tables.read();
        let Some(t) = tables.get(table) else {
            return Ok(Vec::new());
        };
        Ok(t.range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn delete_prefix(&self, table: &str, prefix: &str) -> Result<usize> {
        let mut tables = self.tables.write();
        let Some(t) = tables.get_mut(table) else {
            return Ok(0);
        };
        let before = t.len();
        t.retain(|k, _| !k.starts_with(prefix));
        Ok(before - t.len())
    }

    fn is_persistent(&self) -> bool {
        false
    }
}
