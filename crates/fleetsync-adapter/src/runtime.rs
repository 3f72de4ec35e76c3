// Copyright (C) 2025 The fleetsync Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime hosting every processor.
//!
//! [`AdapterRuntime`] spawns the maintenance coordinator and one task per
//! entity processor, all sharing one [`Coordination`] and one shutdown token.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use fleetsync_adapter::{config::Config, db, runtime::AdapterRuntime};
//! use fleetsync_feed::ApiClient;
//! use tokio_util::sync::CancellationToken;
//!
//! let config = Config::from_env()?;
//! let shutdown = CancellationToken::new();
//! let store = db::connect(&config.database, config.database.store_config(shutdown.clone())).await?;
//! let feed = Arc::new(ApiClient::new(config.api.clone())?);
//!
//! let mut runtime = AdapterRuntime::builder()
//!     .store(store)
//!     .feed(feed)
//!     .sync_config(config.sync)
//!     .maintenance(config.maintenance)
//!     .shutdown(shutdown)
//!     .build()?
//!     .start()
//!     .await?;
//!
//! if let Some(failure) = runtime.wait_fatal().await {
//!     eprintln!("{} failed: {}", failure.processor, failure.error);
//! }
//! runtime.shutdown().await?;
//! ```

use std::sync::Arc;

use anyhow::Result;
use fleetsync_core::{
    AdapterStore, Coordination, DependencyMap, FeedSource, MaintenanceConfig,
    MaintenanceCoordinator, ProcessorContext, SyncError,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::SyncConfig;
use crate::dependencies;
use crate::processors::EntityKind;

/// A processor that stopped with an error.
#[derive(Debug)]
pub struct ProcessorFailure {
    /// Name of the failed processor.
    pub processor: String,
    /// Why it stopped.
    pub error: SyncError,
}

/// Builder for creating an [`AdapterRuntime`].
#[derive(Default)]
pub struct AdapterRuntimeBuilder {
    store: Option<Arc<dyn AdapterStore>>,
    feed: Option<Arc<dyn FeedSource>>,
    sync: Option<SyncConfig>,
    maintenance: Option<MaintenanceConfig>,
    dependencies: Option<DependencyMap>,
    kinds: Option<Vec<EntityKind>>,
    shutdown: Option<CancellationToken>,
}

impl AdapterRuntimeBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the adapter database store (required).
    pub fn store(mut self, store: Arc<dyn AdapterStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the upstream feed (required).
    pub fn feed(mut self, feed: Arc<dyn FeedSource>) -> Self {
        self.feed = Some(feed);
        self
    }

    /// Set the processor settings (required).
    pub fn sync_config(mut self, sync: SyncConfig) -> Self {
        self.sync = Some(sync);
        self
    }

    /// Set the maintenance settings.
    ///
    /// Default: [`MaintenanceConfig::default()`]
    pub fn maintenance(mut self, maintenance: MaintenanceConfig) -> Self {
        self.maintenance = Some(maintenance);
        self
    }

    /// Override the constraint ownership map.
    ///
    /// Default: [`dependencies::dependency_map()`]
    pub fn dependencies(mut self, dependencies: DependencyMap) -> Self {
        self.dependencies = Some(dependencies);
        self
    }

    /// Restrict the runtime to some entity kinds.
    ///
    /// Default: [`EntityKind::ALL`]
    pub fn kinds(mut self, kinds: impl IntoIterator<Item = EntityKind>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    /// Share a shutdown token, e.g. the one the store's retry backoff watches.
    ///
    /// Default: a fresh token
    pub fn shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing, the store's provider
    /// is unsupported, or an enabled processor depends on one that will not run.
    pub fn build(self) -> Result<AdapterRuntimeConfig> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store is required"))?;
        let feed = self
            .feed
            .ok_or_else(|| anyhow::anyhow!("feed is required"))?;
        let sync = self
            .sync
            .ok_or_else(|| anyhow::anyhow!("sync_config is required"))?;
        store.provider().ensure_supported()?;
        let kinds = self.kinds.unwrap_or_else(|| EntityKind::ALL.to_vec());
        sync.validate_prerequisites(&kinds)?;

        Ok(AdapterRuntimeConfig {
            store,
            feed,
            sync,
            maintenance: self.maintenance.unwrap_or_default(),
            dependencies: self
                .dependencies
                .unwrap_or_else(dependencies::dependency_map),
            kinds,
            shutdown: self.shutdown.unwrap_or_else(CancellationToken::new),
        })
    }
}

/// Configuration for an [`AdapterRuntime`].
pub struct AdapterRuntimeConfig {
    store: Arc<dyn AdapterStore>,
    feed: Arc<dyn FeedSource>,
    sync: SyncConfig,
    maintenance: MaintenanceConfig,
    dependencies: DependencyMap,
    kinds: Vec<EntityKind>,
    shutdown: CancellationToken,
}

impl AdapterRuntimeConfig {
    /// Start the runtime, spawning the maintenance coordinator and processors.
    pub async fn start(self) -> Result<AdapterRuntime> {
        let coordination = Arc::new(Coordination::new());
        let shutdown = self.shutdown;

        let maintenance = MaintenanceCoordinator::new(
            self.maintenance,
            self.store.clone(),
            coordination.clone(),
            dependencies::tables(),
            shutdown.clone(),
        );
        let maintenance_handle = tokio::spawn(async move {
            if let Err(e) = maintenance.run().await {
                error!(error = %e.chain(), "Maintenance coordinator failed");
            }
        });

        let ctx = ProcessorContext {
            store: self.store,
            feed: self.feed,
            coordination: coordination.clone(),
            dependencies: Arc::new(self.dependencies),
            shutdown: shutdown.clone(),
        };
        let filters = Arc::new(self.sync.filters.clone());

        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        let mut processor_handles = Vec::with_capacity(self.kinds.len());
        for kind in &self.kinds {
            let processor =
                kind.build(self.sync.processor_config(*kind), ctx.clone(), filters.clone());
            let name = processor.name().to_string();
            let fatal_tx = fatal_tx.clone();
            let task_name = name.clone();
            let handle = tokio::spawn(async move {
                if let Err(error) = processor.run().await {
                    error!(processor = %task_name, error = %error.chain(), "Processor failed");
                    let _ = fatal_tx.send(ProcessorFailure {
                        processor: task_name,
                        error,
                    });
                }
            });
            processor_handles.push((name, handle));
        }

        info!(
            processors = processor_handles.len(),
            host = %self.sync.host_name,
            "AdapterRuntime started"
        );

        Ok(AdapterRuntime {
            coordination,
            shutdown,
            maintenance_handle,
            processor_handles,
            fatal_rx,
        })
    }
}

/// A running adapter that can be embedded in an application.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct AdapterRuntime {
    coordination: Arc<Coordination>,
    shutdown: CancellationToken,
    maintenance_handle: JoinHandle<()>,
    processor_handles: Vec<(String, JoinHandle<()>)>,
    fatal_rx: mpsc::UnboundedReceiver<ProcessorFailure>,
}

impl AdapterRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> AdapterRuntimeBuilder {
        AdapterRuntimeBuilder::new()
    }

    /// Shared connectivity and maintenance state.
    pub fn coordination(&self) -> &Arc<Coordination> {
        &self.coordination
    }

    /// Names of the spawned processors.
    pub fn processor_names(&self) -> Vec<&str> {
        self.processor_handles
            .iter()
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Wait for the first processor that stops with an error.
    ///
    /// Returns `None` once every processor has stopped cleanly.
    pub async fn wait_fatal(&mut self) -> Option<ProcessorFailure> {
        self.fatal_rx.recv().await
    }

    /// Check if any task is still running.
    pub fn is_running(&self) -> bool {
        !self.maintenance_handle.is_finished()
            || self
                .processor_handles
                .iter()
                .any(|(_, handle)| !handle.is_finished())
    }

    /// Gracefully shut down the runtime.
    ///
    /// Cancels the shared token, then waits for the maintenance coordinator
    /// and every processor to return.
    pub async fn shutdown(self) -> Result<()> {
        info!("AdapterRuntime shutting down...");
        self.shutdown.cancel();

        if let Err(e) = self.maintenance_handle.await {
            error!("Maintenance coordinator task panicked: {}", e);
        }

        let mut panicked = Vec::new();
        for (name, handle) in self.processor_handles {
            if let Err(e) = handle.await {
                error!(processor = %name, "Processor task panicked: {}", e);
                panicked.push(name);
            }
        }

        if panicked.is_empty() {
            info!("AdapterRuntime shutdown complete");
            Ok(())
        } else {
            Err(anyhow::anyhow!(
                "processor tasks panicked: {}",
                panicked.join(", ")
            ))
        }
    }
}
