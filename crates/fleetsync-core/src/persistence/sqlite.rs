// Copyright (C) 2025 The fleetsync Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed adapter store.
//!
//! SQLite has no stored procedures, so the merge is a generated upsert:
//!
//! ```sql
//! INSERT INTO t (cols) SELECT cols FROM stg_t WHERE true
//! ON CONFLICT (key) DO UPDATE SET c = excluded.c, ...
//! WHERE t.c IS NOT excluded.c OR ...
//! ```
//!
//! SQLite also does not report which foreign key failed. When the merge is
//! rejected with a foreign-key error, the staging table is probed against each
//! declared foreign key of the entity (still inside the failed transaction) to
//! name the violated constraint.

use async_trait::async_trait;
use sqlx::sqlite::SqliteConnection;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, info};

use crate::checkpoint::Checkpoint;
use crate::entity::{EntityTable, Row, SqlValue};
use crate::error::{Resource, Result, SyncError};
use crate::retry::with_retry;

use super::{
    AdapterStore, CheckpointRow, MaintenanceTask, ProviderType, StoreConfig, bounded,
    chunk_rows, claim_tracking, column_list,
};

/// Maximum bind parameters per statement (SQLITE_MAX_VARIABLE_NUMBER).
const SQLITE_BIND_LIMIT: usize = 32766;

/// SQLite-backed adapter store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    config: StoreConfig,
}

impl SqliteStore {
    /// Create a store over an existing pool. Migrations must already be applied.
    pub fn new(pool: SqlitePool, config: StoreConfig) -> Self {
        Self { pool, config }
    }

    /// Underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn ensure_tracking_once(
        &self,
        processor_id: &str,
        process_version: &str,
        host_name: &str,
        validate_host: bool,
    ) -> Result<Checkpoint> {
        let mut tx = self.pool.begin().await?;

        let existing = select_checkpoint(&mut tx, processor_id).await?;
        let checkpoint = match existing {
            Some(existing) => claim_tracking(existing, process_version, host_name, validate_host)?,
            None => Checkpoint::new(processor_id, process_version, host_name),
        };
        write_checkpoint(&mut tx, &checkpoint).await?;

        tx.commit().await?;
        Ok(checkpoint)
    }

    async fn load_checkpoint_once(&self, processor_id: &str) -> Result<Option<Checkpoint>> {
        let mut conn = self.pool.acquire().await?;
        select_checkpoint(&mut conn, processor_id).await
    }

    async fn persist_once(
        &self,
        table: &'static EntityTable,
        rows: &[Row],
        checkpoint: &Checkpoint,
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        if !rows.is_empty() {
            let staging = table.staging_table();
            sqlx::query(&format!("DELETE FROM \"{}\"", staging))
                .execute(&mut *tx)
                .await?;

            let columns = column_list(table.columns.iter().map(|c| c.name));
            for chunk in rows.chunks(chunk_rows(SQLITE_BIND_LIMIT, table.columns.len())) {
                let mut builder: QueryBuilder<Sqlite> =
                    QueryBuilder::new(format!("INSERT INTO \"{}\" ({}) ", staging, columns));
                builder.push_values(chunk, |mut b, row| {
                    for value in row.values() {
                        match value {
                            SqlValue::Bool(v) => b.push_bind(*v),
                            SqlValue::BigInt(v) => b.push_bind(*v),
                            SqlValue::Double(v) => b.push_bind(*v),
                            SqlValue::Text(v) => b.push_bind(v.clone()),
                            SqlValue::Timestamp(v) => b.push_bind(*v),
                        };
                    }
                });
                builder.build().execute(&mut *tx).await?;
            }

            if let Err(err) = sqlx::query(&merge_sql(table)).execute(&mut *tx).await {
                return match SyncError::from(err) {
                    SyncError::ConstraintViolation {
                        constraint,
                        message,
                    } if constraint.is_empty() => {
                        let diagnosed = diagnose_constraint(&mut tx, table).await?;
                        Err(SyncError::ConstraintViolation {
                            constraint: diagnosed.unwrap_or_default().to_string(),
                            message,
                        })
                    }
                    other => Err(other),
                };
            }
        }

        write_checkpoint(&mut tx, checkpoint).await?;
        tx.commit().await?;

        Ok(rows.len() as u64)
    }
}

#[async_trait]
impl AdapterStore for SqliteStore {
    fn provider(&self) -> ProviderType {
        ProviderType::Sqlite
    }

    async fn health_check(&self) -> Result<()> {
        let probe = async {
            sqlx::query_scalar::<_, i64>("SELECT 1")
                .fetch_one(&self.pool)
                .await?;
            Ok(())
        };
        bounded(self.config.command_timeout, "health_check", probe)
            .await
            .map_err(|e| SyncError::connectivity(Resource::Database, e.to_string()))
    }

    async fn ensure_tracking(
        &self,
        processor_id: &str,
        process_version: &str,
        host_name: &str,
        validate_host: bool,
    ) -> Result<Checkpoint> {
        with_retry(&self.config.retry, &self.config.shutdown, "ensure_tracking", || {
            bounded(
                self.config.command_timeout,
                "ensure_tracking",
                self.ensure_tracking_once(processor_id, process_version, host_name, validate_host),
            )
        })
        .await
    }

    async fn load_checkpoint(&self, processor_id: &str) -> Result<Option<Checkpoint>> {
        with_retry(&self.config.retry, &self.config.shutdown, "load_checkpoint", || {
            bounded(
                self.config.command_timeout,
                "load_checkpoint",
                self.load_checkpoint_once(processor_id),
            )
        })
        .await
    }

    async fn persist_batch(
        &self,
        table: &'static EntityTable,
        rows: &[Row],
        checkpoint: &Checkpoint,
    ) -> Result<u64> {
        let merged = with_retry(&self.config.retry, &self.config.shutdown, "persist_batch", || {
            bounded(
                self.config.command_timeout,
                "persist_batch",
                self.persist_once(table, rows, checkpoint),
            )
        })
        .await?;

        debug!(
            table = table.name,
            rows = merged,
            feed_version = ?checkpoint.last_feed_version,
            "Batch merged"
        );
        Ok(merged)
    }

    async fn run_maintenance(
        &self,
        task: MaintenanceTask,
        tables: &[&'static EntityTable],
    ) -> Result<()> {
        for table in tables {
            let sql = match task {
                MaintenanceTask::UpdateStatistics => format!("ANALYZE \"{}\"", table.name),
                MaintenanceTask::RebuildIndexes => format!("REINDEX \"{}\"", table.name),
                MaintenanceTask::TruncateStaging => {
                    format!("DELETE FROM \"{}\"", table.staging_table())
                }
            };
            let statement = async {
                sqlx::query(&sql).execute(&self.pool).await?;
                Ok(())
            };
            bounded(self.config.maintenance_timeout, "maintenance", statement).await?;
            info!(task = %task, table = table.name, "Maintenance task applied");
        }
        Ok(())
    }
}

async fn select_checkpoint(
    conn: &mut SqliteConnection,
    processor_id: &str,
) -> Result<Option<Checkpoint>> {
    let row = sqlx::query_as::<_, CheckpointRow>(
        r#"
        SELECT processor_id, last_feed_version, last_retrieval_utc,
               last_processed_utc, process_version, host_name
        FROM service_tracking
        WHERE processor_id = ?
        "#,
    )
    .bind(processor_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(Checkpoint::from))
}

async fn write_checkpoint(conn: &mut SqliteConnection, checkpoint: &Checkpoint) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO service_tracking
            (processor_id, last_feed_version, last_retrieval_utc, last_processed_utc,
             process_version, host_name, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT (processor_id) DO UPDATE SET
            last_feed_version = excluded.last_feed_version,
            last_retrieval_utc = excluded.last_retrieval_utc,
            last_processed_utc = excluded.last_processed_utc,
            process_version = excluded.process_version,
            host_name = excluded.host_name,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&checkpoint.processor_id)
    .bind(checkpoint.last_feed_version.map(|v| v.get()))
    .bind(checkpoint.last_retrieval_utc)
    .bind(checkpoint.last_processed_utc)
    .bind(&checkpoint.process_version)
    .bind(&checkpoint.host_name)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Generated upsert from the staging table into the durable table.
fn merge_sql(table: &EntityTable) -> String {
    let staging = table.staging_table();
    let columns = column_list(table.columns.iter().map(|c| c.name));
    let key = column_list(table.key.iter().copied());

    let mut sql = format!(
        "INSERT INTO \"{table}\" ({columns}) SELECT {columns} FROM \"{staging}\" WHERE true ON CONFLICT ({key}) ",
        table = table.name,
    );

    let values: Vec<&str> = table.value_columns().map(|c| c.name).collect();
    if values.is_empty() {
        sql.push_str("DO NOTHING");
        return sql;
    }

    let assignments = values
        .iter()
        .map(|c| format!("\"{c}\" = excluded.\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let changed = values
        .iter()
        .map(|c| format!("\"{t}\".\"{c}\" IS NOT excluded.\"{c}\"", t = table.name))
        .collect::<Vec<_>>()
        .join(" OR ");

    sql.push_str(&format!("DO UPDATE SET {} WHERE {}", assignments, changed));
    sql
}

/// Find the first declared foreign key that a staged row violates.
async fn diagnose_constraint(
    conn: &mut SqliteConnection,
    table: &'static EntityTable,
) -> Result<Option<&'static str>> {
    let staging = table.staging_table();
    for fk in table.foreign_keys {
        let sql = format!(
            "SELECT 1 FROM \"{staging}\" s WHERE s.\"{col}\" IS NOT NULL AND NOT EXISTS \
             (SELECT 1 FROM \"{parent}\" p WHERE p.\"{pcol}\" = s.\"{col}\") LIMIT 1",
            col = fk.column,
            parent = fk.parent_table,
            pcol = fk.parent_column,
        );
        let orphan: Option<i64> = sqlx::query_scalar(&sql)
            .fetch_optional(&mut *conn)
            .await?;
        if orphan.is_some() {
            debug!(
                table = table.name,
                constraint = fk.constraint,
                "Diagnosed foreign key violation"
            );
            return Ok(Some(fk.constraint));
        }
    }
    Ok(None)
}
