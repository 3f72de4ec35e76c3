// Copyright (C) 2025 The fleetsync Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Adapter database access: checkpoints and the staging-merge protocol.
//!
//! [`AdapterStore`] is the persistence abstraction every processor and the
//! maintenance coordinator talk to. Two backends implement it:
//!
//! - [`PostgresStore`] merges through `spmerge_stg_<entity>()` stored procedures.
//! - [`SqliteStore`] merges through a generated `INSERT ... ON CONFLICT` upsert.
//!
//! Every batch write runs in a single transaction wrapped by
//! [`with_retry`](crate::retry::with_retry): empty the staging table, bulk-load
//! the rows, merge, and record the checkpoint. Nothing is visible until the
//! commit.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresStore;
pub use self::sqlite::SqliteStore;

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::checkpoint::{Checkpoint, FeedVersion};
use crate::entity::{EntityTable, Row};
use crate::error::{Result, SyncError};
use crate::retry::RetryPolicy;

/// Target database engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderType {
    /// PostgreSQL.
    PostgreSql,
    /// SQLite.
    Sqlite,
    /// Microsoft SQL Server. Recognized but not supported.
    SqlServer,
}

impl ProviderType {
    /// Fail with a configuration error unless a backend exists for this provider.
    pub fn ensure_supported(self) -> Result<Self> {
        match self {
            Self::PostgreSql | Self::Sqlite => Ok(self),
            Self::SqlServer => Err(SyncError::Configuration(
                "database provider 'sqlserver' is not supported; use 'postgresql' or 'sqlite'"
                    .to_string(),
            )),
        }
    }
}

impl FromStr for ProviderType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" | "pg" => Ok(Self::PostgreSql),
            "sqlite" => Ok(Self::Sqlite),
            "sqlserver" | "mssql" => Ok(Self::SqlServer),
            other => Err(SyncError::Configuration(format!(
                "unknown database provider '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PostgreSql => "postgresql",
            Self::Sqlite => "sqlite",
            Self::SqlServer => "sqlserver",
        };
        f.write_str(s)
    }
}

/// Database upkeep operations run by the maintenance coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceTask {
    /// Refresh planner statistics on every durable table.
    UpdateStatistics,
    /// Rebuild the indexes of every durable table.
    RebuildIndexes,
    /// Empty every staging table.
    TruncateStaging,
}

impl fmt::Display for MaintenanceTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::UpdateStatistics => "update_statistics",
            Self::RebuildIndexes => "rebuild_indexes",
            Self::TruncateStaging => "truncate_staging",
        };
        f.write_str(s)
    }
}

/// Settings shared by both backends.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Upper bound for one database transaction.
    pub command_timeout: Duration,
    /// Upper bound for one maintenance statement.
    pub maintenance_timeout: Duration,
    /// Retry policy wrapping every transaction.
    pub retry: RetryPolicy,
    /// Cancels retry backoff on shutdown.
    pub shutdown: CancellationToken,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(30),
            maintenance_timeout: Duration::from_secs(3600),
            retry: RetryPolicy::default(),
            shutdown: CancellationToken::new(),
        }
    }
}

/// Persistence abstraction for the adapter database.
#[async_trait]
pub trait AdapterStore: Send + Sync {
    /// Engine behind this store.
    fn provider(&self) -> ProviderType;

    /// Cheap reachability check.
    async fn health_check(&self) -> Result<()>;

    /// Create or claim the tracking row of `processor_id`.
    ///
    /// With `validate_host`, a row last written by a different machine is
    /// rejected with [`SyncError::HostMismatch`]. Otherwise the row is taken
    /// over by `host_name`.
    async fn ensure_tracking(
        &self,
        processor_id: &str,
        process_version: &str,
        host_name: &str,
        validate_host: bool,
    ) -> Result<Checkpoint>;

    /// Read the tracking row of `processor_id`.
    async fn load_checkpoint(&self, processor_id: &str) -> Result<Option<Checkpoint>>;

    /// Stage, merge, and checkpoint one batch atomically.
    ///
    /// Returns the number of rows merged. An empty batch only records the
    /// checkpoint.
    async fn persist_batch(
        &self,
        table: &'static EntityTable,
        rows: &[Row],
        checkpoint: &Checkpoint,
    ) -> Result<u64>;

    /// Run one maintenance task over the given tables.
    async fn run_maintenance(
        &self,
        task: MaintenanceTask,
        tables: &[&'static EntityTable],
    ) -> Result<()>;
}

/// Raw `service_tracking` row as decoded by sqlx.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct CheckpointRow {
    pub processor_id: String,
    pub last_feed_version: Option<i64>,
    pub last_retrieval_utc: Option<DateTime<Utc>>,
    pub last_processed_utc: Option<DateTime<Utc>>,
    pub process_version: String,
    pub host_name: String,
}

impl From<CheckpointRow> for Checkpoint {
    fn from(row: CheckpointRow) -> Self {
        Self {
            processor_id: row.processor_id,
            last_feed_version: row.last_feed_version.map(FeedVersion),
            last_retrieval_utc: row.last_retrieval_utc,
            last_processed_utc: row.last_processed_utc,
            process_version: row.process_version,
            host_name: row.host_name,
        }
    }
}

/// Decide what to do with an existing tracking row during `ensure_tracking`.
pub(crate) fn claim_tracking(
    existing: Checkpoint,
    process_version: &str,
    host_name: &str,
    validate_host: bool,
) -> Result<Checkpoint> {
    if validate_host && existing.host_name != host_name {
        return Err(SyncError::HostMismatch {
            processor: existing.processor_id,
            recorded: existing.host_name,
            current: host_name.to_string(),
        });
    }
    Ok(Checkpoint {
        process_version: process_version.to_string(),
        host_name: host_name.to_string(),
        ..existing
    })
}

/// Bound a database future by `limit`; an elapsed timer is a transient fault.
pub(crate) async fn bounded<T, F>(limit: Duration, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::Transient {
            message: format!("{} exceeded timeout of {:?}", operation, limit),
        }),
    }
}

/// Rows per bulk-load statement, given the engine's bind-parameter limit.
pub(crate) fn chunk_rows(bind_limit: usize, columns: usize) -> usize {
    (bind_limit / columns.max(1)).max(1)
}

/// Quote a column list for generated SQL.
pub(crate) fn column_list<'a>(columns: impl IntoIterator<Item = &'a str>) -> String {
    columns
        .into_iter()
        .map(|c| format!("\"{}\"", c))
        .collect::<Vec<_>>()
        .join(", ")
}
