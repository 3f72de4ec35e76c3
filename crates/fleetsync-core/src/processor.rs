// Copyright (C) 2025 The fleetsync Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The per-entity processor loop.
//!
//! An [`EntityProcessor`] owns one entity type end to end. Each iteration:
//!
//! 1. checks the shared [`Coordination`] state, pausing for maintenance or
//!    probing the lost resource while a connectivity fault is in effect;
//! 2. claims its tracking row and waits for prerequisite processors and the
//!    startup maintenance pass;
//! 3. fetches one page from the feed, maps it, and persists it together with
//!    the advanced checkpoint;
//! 4. after a caught-up page, sleeps the feed interval before the next fetch.
//!    A maintenance pause request cuts that sleep short.
//!
//! Every failure rolls the feed cursor back to the last committed checkpoint,
//! so the next fetch re-reads exactly what was not durably written.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::checkpoint::Checkpoint;
use crate::coordination::{ConnectivityState, Coordination, WaitReason};
use crate::dependency::{DependencyMap, DependencyWait, OwnerWaitOutcome, wait_for_owner};
use crate::entity::{EntityMapper, map_batch};
use crate::error::{ErrorClass, Resource, Result, SyncError};
use crate::feed::{FeedCursor, FeedCursorConfig, FeedSource};
use crate::persistence::AdapterStore;
use crate::shutdown::sleep_cancellable;

/// Where a processor currently is in its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    /// Not started yet, or waiting for prerequisites.
    WaitingOnPrerequisites,
    /// Waiting for connectivity or for maintenance to finish.
    WaitingOnConnectivity,
    /// Fetching and mapping a feed page.
    Extracting,
    /// Writing a batch to the adapter database.
    Persisting,
    /// Caught up; sleeping until the next fetch is due.
    Throttling,
    /// Shut down.
    Stopped,
}

/// Per-processor settings.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Processor name; also the key of its tracking row.
    pub name: String,
    /// Disabled processors return immediately without registering.
    pub enabled: bool,
    /// Whether maintenance must wait for this processor to pause.
    pub requires_maintenance_pause: bool,
    /// Processors that must have completed a cycle before this one starts.
    pub prerequisites: Vec<String>,
    /// Feed paging settings.
    pub cursor: FeedCursorConfig,
    /// Delay between probes while a connectivity fault is in effect.
    pub connectivity_retry_interval: Duration,
    /// Delay between checks while paused for maintenance.
    pub pause_poll_interval: Duration,
    /// Delay between prerequisite checks.
    pub prerequisite_poll_interval: Duration,
    /// Bounds for waiting on a foreign-key owner.
    pub dependency_wait: DependencyWait,
    /// Reject tracking rows owned by another machine.
    pub validate_host: bool,
    /// Name of this machine.
    pub host_name: String,
    /// Version recorded in the tracking row.
    pub process_version: String,
}

impl ProcessorConfig {
    /// Settings with defaults for everything but the name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            requires_maintenance_pause: true,
            prerequisites: Vec::new(),
            cursor: FeedCursorConfig::default(),
            connectivity_retry_interval: Duration::from_secs(10),
            pause_poll_interval: Duration::from_secs(1),
            prerequisite_poll_interval: Duration::from_secs(5),
            dependency_wait: DependencyWait::default(),
            validate_host: true,
            host_name: String::new(),
            process_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Shared handles every processor receives.
#[derive(Clone)]
pub struct ProcessorContext {
    /// Adapter database.
    pub store: Arc<dyn AdapterStore>,
    /// Upstream feed.
    pub feed: Arc<dyn FeedSource>,
    /// Process-wide connectivity and maintenance state.
    pub coordination: Arc<Coordination>,
    /// Constraint ownership for this process.
    pub dependencies: Arc<DependencyMap>,
    /// Shutdown signal shared by every task.
    pub shutdown: CancellationToken,
}

/// A processor that can be spawned as a task, independent of its entity type.
#[async_trait]
pub trait SyncProcessor: Send {
    /// Processor name.
    fn name(&self) -> &str;

    /// Run until shutdown or a fatal error.
    async fn run(self: Box<Self>) -> Result<()>;
}

/// Processor for one entity type, generic over its mapper.
pub struct EntityProcessor<M: EntityMapper> {
    mapper: M,
    config: ProcessorConfig,
    ctx: ProcessorContext,
    cursor: FeedCursor<M::Source>,
    checkpoint: Option<Checkpoint>,
    prerequisites_met: bool,
    waiting_on: Option<String>,
    state: watch::Sender<ProcessorState>,
}

impl<M: EntityMapper> EntityProcessor<M> {
    /// Build a processor. Nothing runs until [`run`](SyncProcessor::run).
    pub fn new(mapper: M, config: ProcessorConfig, ctx: ProcessorContext) -> Self {
        let cursor = FeedCursor::new(mapper.entity_type(), ctx.feed.clone(), config.cursor.clone());
        let (state, _) = watch::channel(ProcessorState::WaitingOnPrerequisites);
        Self {
            mapper,
            config,
            ctx,
            cursor,
            checkpoint: None,
            prerequisites_met: false,
            waiting_on: None,
            state,
        }
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ProcessorState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ProcessorState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(processor = %self.config.name, from = ?previous, to = ?state, "State changed");
        }
    }

    async fn run_loop(&mut self) -> Result<()> {
        while !self.ctx.shutdown.is_cancelled() {
            if let Err(err) = self.iteration().await {
                self.handle_error(err).await?;
            }
        }
        Ok(())
    }

    async fn iteration(&mut self) -> Result<()> {
        self.set_state(ProcessorState::WaitingOnConnectivity);
        if !self.connectivity_gate().await {
            return Ok(());
        }

        self.set_state(ProcessorState::WaitingOnPrerequisites);
        if !self.prerequisites_ready().await? {
            sleep_cancellable(&self.ctx.shutdown, self.config.prerequisite_poll_interval).await;
            return Ok(());
        }

        let due_in = self.cursor.time_until_due();
        if !due_in.is_zero() {
            self.set_state(ProcessorState::Throttling);
            self.throttle(due_in).await;
            return Ok(());
        }

        self.set_state(ProcessorState::Extracting);
        self.process_batch().await
    }

    /// Sleep until the feed is due. A maintenance pause request ends the sleep
    /// early so the next gate check can acknowledge it.
    async fn throttle(&self, duration: Duration) {
        if !self.config.requires_maintenance_pause {
            sleep_cancellable(&self.ctx.shutdown, duration).await;
            return;
        }
        tokio::select! {
            _ = sleep_cancellable(&self.ctx.shutdown, duration) => {}
            _ = self.ctx.coordination.wait_for_pause_request() => {}
        }
    }

    /// Returns `true` when work may proceed.
    async fn connectivity_gate(&mut self) -> bool {
        let name = self.config.name.as_str();
        match self.ctx.coordination.state() {
            ConnectivityState::Normal => {
                self.ctx.coordination.release_pause(name);
                true
            }
            ConnectivityState::Waiting(WaitReason::MaintenancePending) => {
                if !self.config.requires_maintenance_pause {
                    return true;
                }
                self.ctx.coordination.acknowledge_pause(name);
                sleep_cancellable(&self.ctx.shutdown, self.config.pause_poll_interval).await;
                false
            }
            ConnectivityState::Waiting(reason) => {
                self.try_restore(reason).await;
                false
            }
        }
    }

    /// Sleep the retry interval, then probe the lost resource once.
    async fn try_restore(&mut self, reason: WaitReason) {
        if !sleep_cancellable(&self.ctx.shutdown, self.config.connectivity_retry_interval).await {
            return;
        }

        let probe = match reason {
            WaitReason::UpstreamUnavailable => self.ctx.feed.probe().await,
            WaitReason::DatabaseUnavailable => self.ctx.store.health_check().await,
            WaitReason::MaintenancePending => Ok(()),
        };

        match probe {
            Ok(()) => {
                self.ctx.coordination.clear_connectivity_loss(reason);
                self.cursor.rollback();
            }
            Err(err) => {
                debug!(
                    processor = %self.config.name,
                    reason = %reason,
                    error = %err,
                    "Resource still unavailable"
                );
            }
        }
    }

    async fn prerequisites_ready(&mut self) -> Result<bool> {
        if self.prerequisites_met {
            return Ok(true);
        }

        if self.checkpoint.is_none() {
            let checkpoint = self
                .ctx
                .store
                .ensure_tracking(
                    &self.config.name,
                    &self.config.process_version,
                    &self.config.host_name,
                    self.config.validate_host,
                )
                .await?;
            self.cursor.initialize(checkpoint.last_feed_version);
            info!(
                processor = %self.config.name,
                feed_version = ?checkpoint.last_feed_version,
                "Resuming from checkpoint"
            );
            self.checkpoint = Some(checkpoint);
        }

        if !self.ctx.coordination.initial_maintenance_complete() {
            debug!(processor = %self.config.name, "Waiting for startup maintenance");
            return Ok(false);
        }

        for prerequisite in &self.config.prerequisites {
            let processed = self
                .ctx
                .store
                .load_checkpoint(prerequisite)
                .await?
                .is_some_and(|cp| cp.has_processed());
            if !processed {
                if self.waiting_on.as_deref() != Some(prerequisite.as_str()) {
                    info!(
                        processor = %self.config.name,
                        prerequisite = %prerequisite,
                        "Waiting for prerequisite processor to complete a cycle"
                    );
                    self.waiting_on = Some(prerequisite.clone());
                }
                return Ok(false);
            }
        }
        self.waiting_on = None;

        self.prerequisites_met = true;
        info!(processor = %self.config.name, "Prerequisites met, starting extraction");
        Ok(true)
    }

    /// Fetch, map, and persist one page.
    async fn process_batch(&mut self) -> Result<()> {
        let Some(checkpoint) = self.checkpoint.clone() else {
            return Err(SyncError::Configuration(format!(
                "processor '{}' has no tracking row",
                self.config.name
            )));
        };

        let batch = self.cursor.fetch_next_batch().await?;
        let rows = map_batch(&self.mapper, &batch.items)?;

        self.set_state(ProcessorState::Persisting);
        // Never record a position behind the one already committed.
        let version = batch.to_version.max(checkpoint.last_feed_version);
        let next = checkpoint.advanced_to(version, batch.retrieved_at, Utc::now());
        let merged = self
            .ctx
            .store
            .persist_batch(self.mapper.table(), &rows, &next)
            .await?;

        self.cursor.commit(next.last_feed_version);
        self.checkpoint = Some(next);

        if merged > 0 {
            info!(
                processor = %self.config.name,
                fetched = batch.items.len(),
                merged = merged,
                feed_version = ?version,
                "Batch committed"
            );
        } else {
            debug!(
                processor = %self.config.name,
                fetched = batch.items.len(),
                feed_version = ?version,
                "Empty batch committed"
            );
        }

        Ok(())
    }

    async fn handle_error(&mut self, err: SyncError) -> Result<()> {
        self.cursor.rollback();

        match err.class() {
            ErrorClass::Transient => {
                warn!(processor = %self.config.name, error = %err, "Transient failure, retrying");
                sleep_cancellable(&self.ctx.shutdown, self.config.connectivity_retry_interval)
                    .await;
                Ok(())
            }
            ErrorClass::Connectivity(resource) => {
                self.report_connectivity_loss(resource, &err);
                Ok(())
            }
            ErrorClass::ConstraintViolation(constraint) => {
                let Some(owner) = self
                    .ctx
                    .dependencies
                    .try_get_owner(&constraint)
                    .map(str::to_string)
                else {
                    error!(
                        processor = %self.config.name,
                        constraint = %constraint,
                        error = %err.chain(),
                        "Foreign key violation on unmapped constraint"
                    );
                    return Err(err);
                };
                self.back_off_for(&constraint, &owner).await
            }
            ErrorClass::Fatal => {
                error!(processor = %self.config.name, error = %err.chain(), "Fatal error");
                Err(err)
            }
        }
    }

    async fn back_off_for(&mut self, constraint: &str, owner: &str) -> Result<()> {
        info!(
            processor = %self.config.name,
            constraint = %constraint,
            owner = %owner,
            "Foreign key violation, waiting for owner to advance"
        );

        let store = self.ctx.store.clone();
        let waited = match store.load_checkpoint(owner).await {
            Ok(baseline) => {
                wait_for_owner(
                    store.as_ref(),
                    owner,
                    baseline,
                    self.config.dependency_wait,
                    &self.ctx.shutdown,
                )
                .await
            }
            Err(err) => Err(err),
        };

        match waited {
            Ok(outcome) => {
                if outcome == OwnerWaitOutcome::Advanced {
                    info!(processor = %self.config.name, owner = %owner, "Owner advanced, retrying");
                }
                Ok(())
            }
            Err(err) => match err.class() {
                ErrorClass::Connectivity(resource) => {
                    self.report_connectivity_loss(resource, &err);
                    Ok(())
                }
                ErrorClass::Transient => Ok(()),
                _ => {
                    error!(processor = %self.config.name, error = %err.chain(), "Fatal error");
                    Err(err)
                }
            },
        }
    }

    fn report_connectivity_loss(&self, resource: Resource, err: &SyncError) {
        let reason = match resource {
            Resource::Upstream => WaitReason::UpstreamUnavailable,
            Resource::Database => WaitReason::DatabaseUnavailable,
        };
        warn!(
            processor = %self.config.name,
            reason = %reason,
            error = %err.chain(),
            "Connectivity failure"
        );
        self.ctx.coordination.report_connectivity_loss(reason);
    }
}

#[async_trait]
impl<M: EntityMapper> SyncProcessor for EntityProcessor<M> {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn run(mut self: Box<Self>) -> Result<()> {
        if !self.config.enabled {
            info!(processor = %self.config.name, "Processor disabled");
            self.set_state(ProcessorState::Stopped);
            return Ok(());
        }

        info!(
            processor = %self.config.name,
            entity_type = self.mapper.entity_type(),
            "Processor starting"
        );
        self.ctx
            .coordination
            .register(&self.config.name, self.config.requires_maintenance_pause);

        let result = self.run_loop().await;

        self.ctx.coordination.unregister(&self.config.name);
        self.set_state(ProcessorState::Stopped);
        info!(processor = %self.config.name, "Processor stopped");
        result
    }
}
