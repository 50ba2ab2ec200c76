//! Redb storage backend implementation.
//!
//! Provides persistent storage using the redb embedded database.

use lru::LruCache;
use redb::{Database, ReadableTable, TableDefinition, TableError};
use sensorhub_core::storage::{Result, StorageBackend, StorageError};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

// Single unified table for all data - using namespaced keys
// Format: "table_name:key"
const UNIFIED_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("unified_storage");

const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Configuration for RedbBackend.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct RedbBackendConfig {
    /// Path to the database file.
    pub path: String,

    /// Create parent directories if they don't exist.
    #[serde(default = "default_create_dirs")]
    pub create_dirs: bool,

    /// LRU cache capacity (number of entries). 0 disables caching.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_create_dirs() -> bool {
    true
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

impl RedbBackendConfig {
    /// Create a new config with the given path.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            create_dirs: true,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }

    /// Set whether to create parent directories.
    pub fn with_create_dirs(mut self, create_dirs: bool) -> Self {
        self.create_dirs = create_dirs;
        self
    }

    /// Set the cache capacity.
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Config for a throwaway database in the temp directory.
    pub fn memory() -> Self {
        Self {
            path: ":memory:".to_string(),
            create_dirs: false,
            cache_capacity: 512,
        }
    }
}

fn make_key(table: &str, key: &str) -> String {
    let mut result = String::with_capacity(table.len() + key.len() + 1);
    result.push_str(table);
    result.push(':');
    result.push_str(key);
    result
}

fn backend_err(e: impl std::fmt::Display) -> StorageError {
    StorageError::Backend(e.to_string())
}

/// redb-based persistent storage backend with an optional LRU read cache.
pub struct RedbBackend {
    db: Arc<Database>,
    path: String,
    /// Backing file for ":memory:" databases, removed on drop.
    temp_path: Option<PathBuf>,
    cache: Option<Mutex<LruCache<String, Vec<u8>>>>,
}

impl RedbBackend {
    /// Create a new RedbBackend with the given configuration.
    pub fn new(config: RedbBackendConfig) -> Result<Self> {
        let path = &config.path;

        let (db, temp_path) = if path == ":memory:" {
            // redb has no true in-memory mode; use a temporary file instead.
            let temp_path =
                std::env::temp_dir().join(format!("sensorhub_{}.redb", uuid::Uuid::new_v4()));
            let db = Database::create(&temp_path).map_err(backend_err)?;
            (db, Some(temp_path))
        } else {
            let path_ref = Path::new(path);
            if config.create_dirs {
                if let Some(parent) = path_ref.parent() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            // `create` opens an existing file without truncating it.
            let db = Database::create(path_ref).map_err(backend_err)?;
            (db, None)
        };

        let cache = NonZeroUsize::new(config.cache_capacity).map(|cap| Mutex::new(LruCache::new(cap)));

        tracing::debug!(path = %config.path, "Opened redb backend");

        Ok(Self {
            db: Arc::new(db),
            path: config.path,
            temp_path,
            cache,
        })
    }

    /// Open or create a redb backend at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(RedbBackendConfig::new(
            path.as_ref().to_string_lossy().to_string(),
        ))
    }

    /// Get the storage path.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn cache_put(&self, key: String, value: Vec<u8>) {
        if let Some(cache) = &self.cache {
            cache.lock().put(key, value);
        }
    }

    fn cache_get(&self, key: &str) -> Option<Vec<u8>> {
        self.cache.as_ref().and_then(|c| c.lock().get(key).cloned())
    }

    fn cache_pop(&self, key: &str) {
        if let Some(cache) = &self.cache {
            cache.lock().pop(key);
        }
    }
}

impl StorageBackend for RedbBackend {
    fn write(&self, table: &str, key: &str, value: &[u8]) -> Result<()> {
        let namespaced = make_key(table, key);

        let txn = self.db.begin_write().map_err(backend_err)?;
        {
            let mut t = txn.open_table(UNIFIED_TABLE).map_err(backend_err)?;
            t.insert(namespaced.as_str(), value).map_err(backend_err)?;
        }
        txn.commit().map_err(backend_err)?;

        // Write-through once the commit succeeded
        self.cache_put(namespaced, value.to_vec());
        Ok(())
    }

    fn read(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let namespaced = make_key(table, key);

        if let Some(cached) = self.cache_get(&namespaced) {
            return Ok(Some(cached));
        }

        let txn = self.db.begin_read().map_err(backend_err)?;
        let t = match txn.open_table(UNIFIED_TABLE) {
            Ok(t) => t,
            // Nothing has ever been written
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(backend_err(e)),
        };

        match t.get(namespaced.as_str()).map_err(backend_err)? {
            Some(value) => {
                let data = value.value().to_vec();
                self.cache_put(namespaced, data.clone());
                Ok(Some(data))
            }
            None => Ok(None),
        }
    }

    fn delete(&self, table: &str, key: &str) -> Result<bool> {
        let namespaced = make_key(table, key);
        self.cache_pop(&namespaced);

        let txn = self.db.begin_write().map_err(backend_err)?;
        let removed = {
            let mut t = txn.open_table(UNIFIED_TABLE).map_err(backend_err)?;
            let removed = t.remove(namespaced.as_str()).map_err(backend_err)?;
            removed.is_some()
        };
        txn.commit().map_err(backend_err)?;
        Ok(removed)
    }

    fn scan(&self, table: &str, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let table_prefix = make_key(table, prefix);
        let table_prefix_len = table.len() + 1;

        let txn = self.db.begin_read().map_err(backend_err)?;
        let t = match txn.open_table(UNIFIED_TABLE) {
            Ok(t) => t,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(backend_err(e)),
        };

        let mut results = Vec::new();
        for item in t.range(table_prefix.as_str()..).map_err(backend_err)? {
            let (key, value) = item.map_err(backend_err)?;
            let key_str = key.value();
            if !key_str.starts_with(&table_prefix) {
                break;
            }
            if let Some(rest) = key_str.get(table_prefix_len..) {
                results.push((rest.to_string(), value.value().to_vec()));
            }
        }

        Ok(results)
    }

    fn delete_prefix(&self, table: &str, prefix: &str) -> Result<usize> {
        let table_prefix = make_key(table, prefix);

        let txn = self.db.begin_write().map_err(backend_err)?;
        let removed = {
            let mut t = txn.open_table(UNIFIED_TABLE).map_err(backend_err)?;
            let mut keys = Vec::new();
            for item in t.range(table_prefix.as_str()..).map_err(backend_err)? {
                let (key, _) = item.map_err(backend_err)?;
                let key_str = key.value();
                if !key_str.starts_with(&table_prefix) {
                    break;
                }
                keys.push(key_str.to_string());
            }
            for key in &keys {
                t.remove(key.as_str()).map_err(backend_err)?;
            }
            keys
        };
        txn.commit().map_err(backend_err)?;

        for key in &removed {
            self.cache_pop(key);
        }
        Ok(removed.len())
    }

    fn is_persistent(&self) -> bool {
        self.temp_path.is_none()
    }
}

impl Drop for RedbBackend {
    fn drop(&mut self) {
        if let Some(temp_path) = &self.temp_path {
            if let Err(e) = std::fs::remove_file(temp_path) {
                tracing::debug!(
                    "Failed to remove temporary database file {}: {}",
                    temp_path.display(),
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = RedbBackendConfig::new("./data/test.redb")
            .with_create_dirs(false)
            .with_cache_capacity(0);

        assert_eq!(config.path, "./data/test.redb");
        assert!(!config.create_dirs);
        assert_eq!(config.cache_capacity, 0);
    }

    #[test]
    fn test_make_key() {
        assert_eq!(make_key("alerts", "temp1"), "alerts:temp1");
    }

    #[test]
    fn test_read_before_any_write() {
        let backend = RedbBackend::new(RedbBackendConfig::memory()).unwrap();
        assert!(!backend.is_persistent());
        assert_eq!(backend.read("alerts", "temp1").unwrap(), None);
        assert!(backend.scan("data", "").unwrap().is_empty());
    }

    #[test]
    fn test_scan_stops_at_prefix_boundary() {
        let backend = RedbBackend::new(RedbBackendConfig::memory()).unwrap();
        backend.write("data", "AA/sensors/t1/100", b"1").unwrap();
        backend.write("data", "AA/sensors/t1/200", b"2").unwrap();
        backend.write("data", "AA/sensors/t2/100", b"3").unwrap();
        backend.write("datb", "AA/sensors/t1/100", b"4").unwrap();

        let hits = backend.scan("data", "AA/sensors/t1/").unwrap();
        assert_eq!(
            hits,
            vec![
                ("AA/sensors/t1/100".to_string(), b"1".to_vec()),
                ("AA/sensors/t1/200".to_string(), b"2".to_vec()),
            ]
        );

        assert_eq!(backend.delete_prefix("data", "AA/sensors/t1/").unwrap(), 2);
        assert_eq!(backend.read("data", "AA/sensors/t1/100").unwrap(), None);
        assert_eq!(backend.read("datb", "AA/sensors/t1/100").unwrap(), Some(b"4".to_vec()));
    }
}
