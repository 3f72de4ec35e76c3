// Copyright (C) 2025 The fleetsync Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed adapter store.

use async_trait::async_trait;
use sqlx::postgres::PgConnection;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};

use crate::checkpoint::Checkpoint;
use crate::entity::{EntityTable, Row, SqlValue};
use crate::error::{Resource, Result, SyncError};
use crate::retry::with_retry;

use super::{
    AdapterStore, CheckpointRow, MaintenanceTask, ProviderType, StoreConfig, bounded,
    chunk_rows, claim_tracking, column_list,
};

/// Maximum bind parameters per statement in the PostgreSQL wire protocol.
const PG_BIND_LIMIT: usize = 65535;

/// PostgreSQL-backed adapter store.
///
/// Merges call the `spmerge_stg_<entity>()` procedures created by the schema
/// migrations; each procedure upserts from `stg_<entity>` by natural key and
/// only rewrites rows whose values changed.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    config: StoreConfig,
}

impl PostgresStore {
    /// Create a store over an existing pool. Migrations must already be applied.
    pub fn new(pool: PgPool, config: StoreConfig) -> Self {
        Self { pool, config }
    }

    /// Underlying pool.
    pub fn pool(&self) -> &PgPool {
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

        let existing = select_checkpoint(&mut tx, processor_id, true).await?;
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
        select_checkpoint(&mut conn, processor_id, false).await
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
            sqlx::query(&format!("TRUNCATE TABLE \"{}\"", staging))
                .execute(&mut *tx)
                .await?;

            let columns = column_list(table.columns.iter().map(|c| c.name));
            for chunk in rows.chunks(chunk_rows(PG_BIND_LIMIT, table.columns.len())) {
                let mut builder: QueryBuilder<Postgres> =
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

            sqlx::query(&format!("CALL {}()", table.merge_routine()))
                .execute(&mut *tx)
                .await?;
        }

        write_checkpoint(&mut tx, checkpoint).await?;
        tx.commit().await?;

        Ok(rows.len() as u64)
    }
}

#[async_trait]
impl AdapterStore for PostgresStore {
    fn provider(&self) -> ProviderType {
        ProviderType::PostgreSql
    }

    async fn health_check(&self) -> Result<()> {
        let probe = async {
            sqlx::query_scalar::<_, i32>("SELECT 1")
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
            let sql = maintenance_sql(task, table);
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

fn maintenance_sql(task: MaintenanceTask, table: &EntityTable) -> String {
    match task {
        MaintenanceTask::UpdateStatistics => format!("ANALYZE \"{}\"", table.name),
        MaintenanceTask::RebuildIndexes => format!("REINDEX TABLE \"{}\"", table.name),
        MaintenanceTask::TruncateStaging => format!("TRUNCATE TABLE \"{}\"", table.staging_table()),
    }
}

async fn select_checkpoint(
    conn: &mut PgConnection,
    processor_id: &str,
    for_update: bool,
) -> Result<Option<Checkpoint>> {
    let sql = if for_update {
        r#"
        SELECT processor_id, last_feed_version, last_retrieval_utc,
               last_processed_utc, process_version, host_name
        FROM service_tracking
        WHERE processor_id = $1
        FOR UPDATE
        "#
    } else {
        r#"
        SELECT processor_id, last_feed_version, last_retrieval_utc,
               last_processed_utc, process_version, host_name
        FROM service_tracking
        WHERE processor_id = $1
        "#
    };

    let row = sqlx::query_as::<_, CheckpointRow>(sql)
        .bind(processor_id)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(row.map(Checkpoint::from))
}

async fn write_checkpoint(conn: &mut PgConnection, checkpoint: &Checkpoint) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO service_tracking
            (processor_id, last_feed_version, last_retrieval_utc, last_processed_utc,
             process_version, host_name, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, NOW())
        ON CONFLICT (processor_id) DO UPDATE SET
            last_feed_version = EXCLUDED.last_feed_version,
            last_retrieval_utc = EXCLUDED.last_retrieval_utc,
            last_processed_utc = EXCLUDED.last_processed_utc,
            process_version = EXCLUDED.process_version,
            host_name = EXCLUDED.host_name,
            updated_at = NOW()
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
