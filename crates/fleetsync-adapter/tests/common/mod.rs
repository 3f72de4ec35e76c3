// Copyright (C) 2025 The fleetsync Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures for the fleetsync-adapter integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use fleetsync_adapter::config::SyncConfig;
use fleetsync_core::{
    DependencyWait, FeedPage, FeedRequest, FeedSource, FeedVersion, MaintenanceConfig, Result,
    SqliteStore, StoreConfig,
};
use serde_json::Value;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio::time::Instant;

pub const HOST: &str = "test-host";

/// In-memory feed keyed by entity type. Every object carries a `version`
/// field; a page holds the objects above the requested version.
#[derive(Default)]
pub struct ScriptedFeed {
    entities: HashMap<String, Vec<Value>>,
    requests: Mutex<Vec<(String, Option<FeedVersion>)>>,
}

impl ScriptedFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, entity_type: &str, items: Vec<Value>) -> Self {
        self.entities.insert(entity_type.to_string(), items);
        self
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
        self.requests
            .lock()
            .unwrap()
            .push((entity_type.to_string(), from_version));

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

        let to_version = data
            .last()
            .and_then(|v| v["version"].as_i64())
            .map(FeedVersion)
            .or(from_version);
        Ok(FeedPage { data, to_version })
    }

    async fn multi_call(&self, _requests: &[FeedRequest]) -> Result<Vec<Value>> {
        Ok(Vec::new())
    }

    async fn probe(&self) -> Result<()> {
        Ok(())
    }
}

/// Single-connection in-memory SQLite pool, not yet migrated.
pub async fn memory_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("Failed to create in-memory SQLite pool")
}

/// Migrated in-memory store.
pub async fn migrated_store() -> (SqlitePool, Arc<SqliteStore>) {
    let pool = memory_pool().await;
    fleetsync_adapter::migrations::run_sqlite(&pool)
        .await
        .expect("Failed to run migrations");
    let store = Arc::new(SqliteStore::new(pool.clone(), StoreConfig::default()));
    (pool, store)
}

pub async fn count(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn last_feed_version(pool: &SqlitePool, processor: &str) -> Option<i64> {
    sqlx::query_scalar::<_, Option<i64>>(
        "SELECT last_feed_version FROM service_tracking WHERE processor_id = ?",
    )
    .bind(processor)
    .fetch_optional(pool)
    .await
    .unwrap()
    .flatten()
}

/// Processor settings with intervals short enough for tests.
pub fn sync_config() -> SyncConfig {
    let mut sync = SyncConfig::new(HOST);
    sync.feed_interval = Duration::from_millis(50);
    sync.batch_size = 100;
    sync.connectivity_retry_interval = Duration::from_millis(20);
    sync.pause_poll_interval = Duration::from_millis(10);
    sync.prerequisite_poll_interval = Duration::from_millis(20);
    sync.dependency_wait = DependencyWait {
        timeout: Duration::from_secs(2),
        poll_interval: Duration::from_millis(20),
    };
    sync
}

pub fn no_maintenance() -> MaintenanceConfig {
    MaintenanceConfig {
        enabled: false,
        ..MaintenanceConfig::default()
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
