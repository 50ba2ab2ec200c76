//! History store tests.
//!
//! Tests include:
//! - Path layout of appended entries
//! - Last-write-wins on a millisecond collision
//! - Latest / recent / per-device listing order
//! - Wholesale deletion by entity id
//! - Persistence across reopen with redb

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sensorhub_core::storage::StorageBackend;
use sensorhub_storage::{
    EntityKind, HistoryKey, HistoryStore, MemoryBackend, RedbBackend, RedbBackendConfig,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Reading {
    value: String,
}

fn reading(value: &str) -> Reading {
    Reading {
        value: value.to_string(),
    }
}

fn memory_store() -> (Arc<MemoryBackend>, HistoryStore) {
    let backend = Arc::new(MemoryBackend::new());
    let store = HistoryStore::new(backend.clone());
    (backend, store)
}

#[tokio::test]
async fn test_append_writes_at_expected_path() {
    let (backend, store) = memory_store();
    let key = HistoryKey::new("AA:BB:CC", EntityKind::Sensors, "temp1", 1717243200000);

    store.append(&key, &reading("23.5")).await.unwrap();

    let raw = backend
        .read("data", "AA:BB:CC/sensors/temp1/1717243200000")
        .unwrap()
        .expect("entry stored under data table");
    let stored: Reading = serde_json::from_slice(&raw).unwrap();
    assert_eq!(stored, reading("23.5"));
    assert_eq!(key.path(), "data/AA:BB:CC/sensors/temp1/1717243200000");
}

#[tokio::test]
async fn test_same_millisecond_last_write_wins() {
    let (backend, store) = memory_store();
    let key = HistoryKey::new("AA:BB:CC", EntityKind::Sensors, "temp1", 1000);

    store.append(&key, &reading("1")).await.unwrap();
    store.append(&key, &reading("2")).await.unwrap();

    assert_eq!(backend.len("data"), 1);
    let stored: Reading = store.get(&key).await.unwrap().unwrap();
    assert_eq!(stored, reading("2"));
}

#[tokio::test]
async fn test_latest_and_recent_use_numeric_order() {
    let (_, store) = memory_store();
    // 999 sorts after 1000 lexically; numeric order must win
    for (millis, value) in [(1000, "b"), (999, "a"), (20000, "d"), (1500, "c")] {
        let key = HistoryKey::new("AA", EntityKind::Sensors, "temp1", millis);
        store.append(&key, &reading(value)).await.unwrap();
    }

    let latest = store
        .latest::<Reading>("AA", EntityKind::Sensors, "temp1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.epoch_millis, 20000);
    assert_eq!(latest.record, reading("d"));

    let recent = store
        .recent::<Reading>("AA", EntityKind::Sensors, "temp1", 2)
        .await
        .unwrap();
    let millis: Vec<i64> = recent.iter().map(|e| e.epoch_millis).collect();
    assert_eq!(millis, vec![1500, 20000]);

    let all = store
        .recent::<Reading>("AA", EntityKind::Sensors, "temp1", 30)
        .await
        .unwrap();
    assert_eq!(all.len(), 4);
    assert_eq!(all[0].record, reading("a"));
}

#[tokio::test]
async fn test_entity_prefix_does_not_leak() {
    let (_, store) = memory_store();
    store
        .append(&HistoryKey::new("AA", EntityKind::Sensors, "t1", 1), &reading("x"))
        .await
        .unwrap();
    store
        .append(&HistoryKey::new("AA", EntityKind::Sensors, "t10", 2), &reading("y"))
        .await
        .unwrap();
    store
        .append(&HistoryKey::new("AA", EntityKind::Actuators, "t1", 3), &reading("z"))
        .await
        .unwrap();

    let history = store
        .entity_history::<Reading>("AA", EntityKind::Sensors, "t1")
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].record, reading("x"));

    let device = store
        .list_device::<Reading>("AA", EntityKind::Sensors)
        .await
        .unwrap();
    let ids: Vec<&str> = device.iter().map(|e| e.entity_id.as_str()).collect();
    assert_eq!(ids, vec!["t1", "t10"]);

    assert!(store
        .latest::<Reading>("BB", EntityKind::Sensors, "t1")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_delete_entity() {
    let (_, store) = memory_store();
    for millis in 0..5 {
        let key = HistoryKey::new("AA", EntityKind::Actuators, "relay", millis);
        store.append(&key, &reading("on")).await.unwrap();
    }
    let other = HistoryKey::new("AA", EntityKind::Actuators, "relay2", 0);
    store.append(&other, &reading("off")).await.unwrap();

    let removed = store
        .delete_entity("AA", EntityKind::Actuators, "relay")
        .await
        .unwrap();
    assert_eq!(removed, 5);

    let left = store
        .list_device::<Reading>("AA", EntityKind::Actuators)
        .await
        .unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].entity_id, "relay2");
}

#[tokio::test]
async fn test_rejects_path_breaking_ids() {
    let (_, store) = memory_store();
    let key = HistoryKey::new("AA", EntityKind::Sensors, "../alerts", 1);
    assert!(store.append(&key, &reading("x")).await.is_err());
}

#[tokio::test]
async fn test_redb_history_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.redb");
    let key = HistoryKey::new("AA:BB:CC", EntityKind::Sensors, "temp1", 1717243200000);

    {
        let backend = RedbBackend::new(RedbBackendConfig::new(path.to_string_lossy())).unwrap();
        let store = HistoryStore::new(Arc::new(backend));
        store.append(&key, &reading("23.5")).await.unwrap();
    }

    let backend = RedbBackend::open(&path).unwrap();
    assert!(backend.is_persistent());
    let store = HistoryStore::new(Arc::new(backend));
    let stored: Reading = store.get(&key).await.unwrap().unwrap();
    assert_eq!(stored, reading("23.5"));
}
