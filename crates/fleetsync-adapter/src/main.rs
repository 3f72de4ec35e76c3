// Copyright (C) 2025 The fleetsync Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! fleetsync Adapter - Telematics Synchronization Service
//!
//! Synchronizes devices, users, diagnostics and telemetry from the upstream
//! telematics API into the adapter database until interrupted.

use std::sync::Arc;
use tracing::{error, info, warn};

use fleetsync_adapter::config::Config;
use fleetsync_adapter::db;
use fleetsync_adapter::runtime::AdapterRuntime;
use fleetsync_feed::ApiClient;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "fleetsync_adapter=info,fleetsync_core=info,fleetsync_feed=info".into()
            }),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    // Load configuration
    let config = Config::from_env()?;

    info!(
        provider = %config.database.provider,
        api_server = %config.api.server,
        host = %config.sync.host_name,
        processors = config.sync.enabled_kinds().len(),
        "Starting fleetsync adapter"
    );

    // Connect to database and apply migrations
    let shutdown = CancellationToken::new();
    let store = db::connect(&config.database, config.database.store_config(shutdown.clone())).await?;

    let feed = Arc::new(ApiClient::new(config.api.clone())?);

    // Start the runtime
    let mut runtime = AdapterRuntime::builder()
        .store(store)
        .feed(feed)
        .sync_config(config.sync)
        .maintenance(config.maintenance)
        .shutdown(shutdown)
        .build()?
        .start()
        .await?;

    info!(processors = ?runtime.processor_names(), "Adapter ready");

    // Wait for shutdown signal or a fatal processor error
    let failure = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutdown signal received");
            None
        }
        failure = runtime.wait_fatal() => failure,
    };

    // Graceful shutdown
    runtime.shutdown().await?;

    if let Some(failure) = failure {
        error!(processor = %failure.processor, "Adapter stopped after a fatal error");
        return Err(anyhow::anyhow!(
            "processor {} failed: {}",
            failure.processor,
            failure.error.chain()
        ));
    }

    info!("fleetsync adapter shut down");

    Ok(())
}
