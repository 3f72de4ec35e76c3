// Copyright (C) 2025 The fleetsync Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures for the fleetsync-core integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use fleetsync_core::{
    AdapterStore, Checkpoint, Column, ColumnType, Coordination, DependencyMap, DependencyWait,
    EntityMapper, EntityTable, FeedCursorConfig, FeedPage, FeedRequest, FeedSource, FeedVersion,
    ForeignKey, ProcessorConfig, ProcessorContext, Resource, Result, Row, SqlValue, SqliteStore,
    StoreConfig, SyncError,
};
use serde::Deserialize;
use serde_json::{Value, json};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const SCHEMA: &str = include_str!("../fixtures/sqlite_schema.sql");

pub const HOST: &str = "test-host";

pub static DEVICES: EntityTable = EntityTable {
    name: "devices",
    columns: &[
        Column::new("id", ColumnType::Text),
        Column::new("name", ColumnType::Text),
        Column::new("active", ColumnType::Bool),
    ],
    key: &["id"],
    foreign_keys: &[],
};

pub static READINGS: EntityTable = EntityTable {
    name: "readings",
    columns: &[
        Column::new("device_id", ColumnType::Text),
        Column::new("recorded_at", ColumnType::Timestamp),
        Column::new("value", ColumnType::Double),
        Column::new("seq", ColumnType::BigInt),
    ],
    key: &["device_id", "recorded_at"],
    foreign_keys: &[ForeignKey {
        constraint: "fk_readings_devices",
        column: "device_id",
        parent_table: "devices",
        parent_column: "id",
    }],
};

#[derive(Debug, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
}

pub struct DeviceMapper;

impl EntityMapper for DeviceMapper {
    type Source = Device;

    fn entity_type(&self) -> &'static str {
        "Device"
    }

    fn table(&self) -> &'static EntityTable {
        &DEVICES
    }

    fn create_entity(&self, source: &Device) -> Result<Row> {
        Ok(Row::new(vec![
            source.id.as_str().into(),
            source.name.as_str().into(),
            true.into(),
        ]))
    }
}

#[derive(Debug, Deserialize)]
pub struct Reading {
    pub device: String,
    pub minute: i64,
    pub value: f64,
    pub version: i64,
}

/// Reading mapper; the entity type is configurable so several processors can
/// share the readings table.
pub struct ReadingMapper(pub &'static str);

impl EntityMapper for ReadingMapper {
    type Source = Reading;

    fn entity_type(&self) -> &'static str {
        self.0
    }

    fn table(&self) -> &'static EntityTable {
        &READINGS
    }

    fn create_entity(&self, source: &Reading) -> Result<Row> {
        let base = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        Ok(Row::new(vec![
            source.device.as_str().into(),
            (base + chrono::Duration::minutes(source.minute)).into(),
            source.value.into(),
            SqlValue::BigInt(Some(source.version)),
        ]))
    }
}

pub fn reading_json(device: &str, minute: i64, version: i64) -> Value {
    json!({ "device": device, "minute": minute, "value": minute as f64 * 0.5, "version": version })
}

pub fn device_json(id: &str, version: i64) -> Value {
    json!({ "id": id, "name": format!("Truck {}", id), "version": version })
}

/// In-memory feed. Every object carries its own `version`; a page holds the
/// objects above the requested version.
#[derive(Default)]
pub struct ScriptedFeed {
    entities: HashMap<String, Vec<Value>>,
    delay: Duration,
    failing_calls: Mutex<HashSet<usize>>,
    reported_version: Option<FeedVersion>,
    calls: AtomicUsize,
    requests: Mutex<Vec<(String, Option<FeedVersion>)>>,
    outage: AtomicBool,
    probes: AtomicUsize,
}

impl ScriptedFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, entity_type: &str, items: Vec<Value>) -> Self {
        self.entities.insert(entity_type.to_string(), items);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the given (1-based) call with an upstream connectivity error.
    pub fn failing_on(self, call: usize) -> Self {
        self.failing_calls.lock().unwrap().insert(call);
        self
    }

    /// Always report this `toVersion`, whatever the page holds.
    pub fn reporting_version(mut self, version: FeedVersion) -> Self {
        self.reported_version = Some(version);
        self
    }

    /// While set, every fetch and probe fails with an upstream connectivity error.
    pub fn set_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn requests_for(&self, entity_type: &str) -> Vec<Option<FeedVersion>> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(e, _)| e == entity_type)
            .map(|(_, v)| *v)
            .collect()
    }
}

#[async_trait]
impl FeedSource for ScriptedFeed {
    async fn get_feed(
        &self,
        entity_type: &str,
        from_version: Option<FeedVersion>,
        limit: u32,
    ) -> Result<FeedPage> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests
            .lock()
            .unwrap()
            .push((entity_type.to_string(), from_version));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.outage.load(Ordering::SeqCst) {
            return Err(SyncError::connectivity(Resource::Upstream, "host unreachable"));
        }
        if self.failing_calls.lock().unwrap().remove(&call) {
            return Err(SyncError::connectivity(Resource::Upstream, "connection reset"));
        }

        let from = from_version.map(|v| v.get()).unwrap_or(0);
        let data: Vec<Value> = self
            .entities
            .get(entity_type)
            .map(|items| {
                items
                    .iter()
                    .filter(|v| v["version"].as_i64().unwrap() > from)
                    .take(limit as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let to_version = self.reported_version.or_else(|| {
            data.last()
                .and_then(|v| v["version"].as_i64())
                .map(FeedVersion)
                .or(from_version)
        });
        Ok(FeedPage { data, to_version })
    }

    async fn multi_call(&self, _requests: &[FeedRequest]) -> Result<Vec<Value>> {
        Ok(Vec::new())
    }

    async fn probe(&self) -> Result<()> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.outage.load(Ordering::SeqCst) {
            return Err(SyncError::connectivity(Resource::Upstream, "host unreachable"));
        }
        Ok(())
    }
}

/// Create an in-memory SQLite pool with the test schema.
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory SQLite pool");

    sqlx::raw_sql(SCHEMA)
        .execute(&pool)
        .await
        .expect("Failed to create schema");

    pool
}

pub async fn test_store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::new(test_pool().await, StoreConfig::default()))
}

pub async fn count(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await
        .unwrap()
}

/// Write device rows directly, recording progress for `owner`.
pub async fn seed_devices(store: &SqliteStore, owner: &str, ids: &[&str], version: i64) {
    let base = match store.load_checkpoint(owner).await.unwrap() {
        Some(cp) => cp,
        None => store.ensure_tracking(owner, "test", HOST, true).await.unwrap(),
    };
    let rows: Vec<Row> = ids
        .iter()
        .map(|id| Row::new(vec![(*id).into(), format!("Truck {}", id).into(), true.into()]))
        .collect();
    let next = base.advanced_to(Some(FeedVersion(version)), Utc::now(), Utc::now());
    store.persist_batch(&DEVICES, &rows, &next).await.unwrap();
}

pub async fn checkpoint(store: &SqliteStore, processor: &str) -> Option<Checkpoint> {
    store.load_checkpoint(processor).await.unwrap()
}

/// Processor settings with intervals short enough for tests.
pub fn processor_config(name: &str) -> ProcessorConfig {
    ProcessorConfig {
        host_name: HOST.to_string(),
        process_version: "test".to_string(),
        cursor: FeedCursorConfig {
            batch_size: 100,
            caught_up_threshold: 100,
            feed_interval: Duration::from_millis(50),
        },
        connectivity_retry_interval: Duration::from_millis(20),
        pause_poll_interval: Duration::from_millis(10),
        prerequisite_poll_interval: Duration::from_millis(20),
        dependency_wait: DependencyWait {
            timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(20),
        },
        ..ProcessorConfig::new(name)
    }
}

pub fn context(
    store: Arc<SqliteStore>,
    feed: Arc<ScriptedFeed>,
    dependencies: DependencyMap,
) -> ProcessorContext {
    let coordination = Arc::new(Coordination::new());
    coordination.mark_initial_maintenance_complete();
    ProcessorContext {
        store,
        feed,
        coordination,
        dependencies: Arc::new(dependencies),
        shutdown: CancellationToken::new(),
    }
}

/// Poll `check` until it holds, panicking after ten seconds.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if check().await {
            return;
        }
        if Instant::now() >= deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
