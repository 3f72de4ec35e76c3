// Copyright (C) 2025 The fleetsync Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Adapter database connection.
//!
//! Opens the pool for the configured provider, applies the schema
//! migrations, and wraps the pool in the matching store.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use fleetsync_core::{AdapterStore, PostgresStore, ProviderType, SqliteStore, StoreConfig};
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::migrations;

/// Connect, migrate, and return the store for `config.provider`.
pub async fn connect(config: &DatabaseConfig, store: StoreConfig) -> Result<Arc<dyn AdapterStore>> {
    match config.provider {
        ProviderType::PostgreSql => {
            let pool = PgPoolOptions::new()
                .max_connections(config.max_connections)
                .acquire_timeout(config.command_timeout)
                .connect(&config.url)
                .await
                .context("failed to connect to PostgreSQL")?;
            info!("Connected to database");

            migrations::run_postgres(&pool)
                .await
                .context("failed to apply PostgreSQL migrations")?;
            info!("Database schema verified");

            Ok(Arc::new(PostgresStore::new(pool, store)))
        }
        ProviderType::Sqlite => {
            let options = SqliteConnectOptions::from_str(&config.url)
                .context("invalid SQLite URL")?
                .create_if_missing(true)
                .foreign_keys(true)
                .busy_timeout(config.command_timeout);
            let pool = SqlitePoolOptions::new()
                .max_connections(config.max_connections)
                .connect_with(options)
                .await
                .context("failed to open SQLite database")?;
            info!("Connected to database");

            migrations::run_sqlite(&pool)
                .await
                .context("failed to apply SQLite migrations")?;
            info!("Database schema verified");

            Ok(Arc::new(SqliteStore::new(pool, store)))
        }
        ProviderType::SqlServer => {
            anyhow::bail!("database provider '{}' is not supported", config.provider)
        }
    }
}
