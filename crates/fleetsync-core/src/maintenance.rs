// Copyright (C) 2025 The fleetsync Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Maintenance coordinator.
//!
//! Runs database upkeep without corrupting in-flight writes:
//!
//! 1. The first pass runs right after startup without pausing anyone, since no
//!    processor writes before [`Coordination::initial_maintenance_complete`].
//! 2. Later passes run when the maintenance interval has elapsed and the current
//!    UTC time lies inside the maintenance window. They request a pause, poll
//!    until every registered pause-requiring processor has acknowledged, and
//!    abort the pass if the pause timeout elapses first.
//!
//! The pause flag is cleared when the pass ends, however it ends.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, Timelike, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::coordination::Coordination;
use crate::entity::EntityTable;
use crate::error::Result;
use crate::persistence::{AdapterStore, MaintenanceTask};
use crate::shutdown::sleep_cancellable;

/// Configuration for the maintenance coordinator.
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Whether maintenance runs at all. When disabled, the startup pass is
    /// considered complete immediately.
    pub enabled: bool,
    /// Start of the daily window, UTC.
    pub window_start: NaiveTime,
    /// Length of the window. May wrap past midnight.
    pub window_duration: Duration,
    /// Minimum gap between two passes.
    pub interval: Duration,
    /// How long to wait for processors to acknowledge a pause.
    pub pause_timeout: Duration,
    /// How often acknowledgements are polled.
    pub pause_poll_interval: Duration,
    /// How often the coordinator checks whether a pass is due.
    pub check_interval: Duration,
    /// Tasks run by each pass, in order.
    pub tasks: Vec<MaintenanceTask>,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_start: NaiveTime::from_hms_opt(2, 0, 0).unwrap_or_default(),
            window_duration: Duration::from_secs(120 * 60),
            interval: Duration::from_secs(24 * 60 * 60),
            pause_timeout: Duration::from_secs(300),
            pause_poll_interval: Duration::from_secs(1),
            check_interval: Duration::from_secs(60),
            tasks: vec![
                MaintenanceTask::TruncateStaging,
                MaintenanceTask::UpdateStatistics,
                MaintenanceTask::RebuildIndexes,
            ],
        }
    }
}

impl MaintenanceConfig {
    /// Whether `now` falls inside the maintenance window.
    pub fn in_window(&self, now: NaiveTime) -> bool {
        const DAY_SECS: i64 = 24 * 60 * 60;
        let window = self.window_duration.as_secs() as i64;
        if window >= DAY_SECS {
            return true;
        }
        let start = i64::from(self.window_start.num_seconds_from_midnight());
        let current = i64::from(now.num_seconds_from_midnight());
        (current - start).rem_euclid(DAY_SECS) < window
    }
}

/// How a maintenance pass ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaintenanceOutcome {
    /// Every task ran.
    Completed,
    /// Processors did not pause in time; nothing ran.
    Aborted {
        /// Pause-requiring processors that never acknowledged.
        not_paused: Vec<String>,
    },
    /// A task failed; later tasks were skipped.
    Failed(String),
}

/// Clears the maintenance pause when dropped.
struct PauseGuard {
    coordination: Arc<Coordination>,
}

impl PauseGuard {
    fn request(coordination: Arc<Coordination>) -> Self {
        coordination.request_maintenance_pause();
        Self { coordination }
    }
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        self.coordination.end_maintenance_pause();
    }
}

/// Pauses processors, runs upkeep, resumes them.
pub struct MaintenanceCoordinator {
    config: MaintenanceConfig,
    store: Arc<dyn AdapterStore>,
    coordination: Arc<Coordination>,
    tables: Vec<&'static EntityTable>,
    shutdown: CancellationToken,
    last_run: Option<DateTime<Utc>>,
}

impl MaintenanceCoordinator {
    /// Create a coordinator over the durable tables it maintains.
    pub fn new(
        config: MaintenanceConfig,
        store: Arc<dyn AdapterStore>,
        coordination: Arc<Coordination>,
        tables: Vec<&'static EntityTable>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            store,
            coordination,
            tables,
            shutdown,
            last_run: None,
        }
    }

    /// Run until shutdown.
    pub async fn run(mut self) -> Result<()> {
        if !self.config.enabled {
            info!("Maintenance disabled");
            self.coordination.mark_initial_maintenance_complete();
            return Ok(());
        }

        info!(
            window_start = %self.config.window_start,
            window_minutes = self.config.window_duration.as_secs() / 60,
            interval_secs = self.config.interval.as_secs(),
            "Maintenance coordinator started"
        );

        // Processors wait on this pass, so it never pauses anyone and is
        // marked complete even when it fails.
        let outcome = self.run_pass(false).await;
        self.log_outcome(&outcome);
        self.coordination.mark_initial_maintenance_complete();

        while sleep_cancellable(&self.shutdown, self.config.check_interval).await {
            if !self.is_due(Utc::now()) {
                continue;
            }
            let outcome = self.run_pass(true).await;
            self.log_outcome(&outcome);
        }

        info!("Maintenance coordinator stopped");
        Ok(())
    }

    /// Whether a pass should start at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        let interval_elapsed = self.last_run.is_none_or(|last| {
            (now - last)
                .to_std()
                .map(|elapsed| elapsed >= self.config.interval)
                .unwrap_or(false)
        });
        interval_elapsed && self.config.in_window(now.time())
    }

    /// Run one pass. With `wait_for_pause`, processors must acknowledge first.
    pub async fn run_pass(&mut self, wait_for_pause: bool) -> MaintenanceOutcome {
        let _guard = if wait_for_pause {
            let guard = PauseGuard::request(self.coordination.clone());
            let not_paused = self.wait_for_pause().await;
            if !not_paused.is_empty() {
                return MaintenanceOutcome::Aborted { not_paused };
            }
            Some(guard)
        } else {
            None
        };

        let outcome = self.run_tasks().await;
        // A failed pass still counts, so a broken task is not retried every minute.
        self.last_run = Some(Utc::now());
        outcome
    }

    /// Poll until every pause-requiring processor acknowledged, or the timeout
    /// (or shutdown) hits. Returns the processors that did not pause.
    async fn wait_for_pause(&self) -> Vec<String> {
        let deadline = Instant::now() + self.config.pause_timeout;
        loop {
            let not_paused = self.coordination.processors_not_paused();
            if not_paused.is_empty() {
                return not_paused;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return not_paused;
            }
            let poll = self.config.pause_poll_interval.min(remaining);
            if !sleep_cancellable(&self.shutdown, poll).await {
                return not_paused;
            }
        }
    }

    async fn run_tasks(&self) -> MaintenanceOutcome {
        let started = Instant::now();
        for task in &self.config.tasks {
            if let Err(err) = self.store.run_maintenance(*task, &self.tables).await {
                return MaintenanceOutcome::Failed(format!("{}: {}", task, err.chain()));
            }
        }
        info!(
            tasks = self.config.tasks.len(),
            tables = self.tables.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Maintenance tasks finished"
        );
        MaintenanceOutcome::Completed
    }

    fn log_outcome(&self, outcome: &MaintenanceOutcome) {
        match outcome {
            MaintenanceOutcome::Completed => info!("Maintenance pass completed"),
            MaintenanceOutcome::Aborted { not_paused } => warn!(
                not_paused = ?not_paused,
                timeout_secs = self.config.pause_timeout.as_secs(),
                "Maintenance aborted: processors did not pause in time"
            ),
            MaintenanceOutcome::Failed(reason) => {
                error!(error = %reason, "Maintenance pass failed")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::Checkpoint;
    use crate::coordination::{ConnectivityState, WaitReason};
    use crate::entity::Row;
    use crate::error::SyncError;
    use crate::persistence::ProviderType;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingStore {
        tasks: Mutex<Vec<MaintenanceTask>>,
        fail: bool,
    }

    #[async_trait]
    impl AdapterStore for RecordingStore {
        fn provider(&self) -> ProviderType {
            ProviderType::Sqlite
        }

        async fn health_check(&self) -> Result<()> {
            Ok(())
        }

        async fn ensure_tracking(
            &self,
            processor_id: &str,
            process_version: &str,
            host_name: &str,
            _validate_host: bool,
        ) -> Result<Checkpoint> {
            Ok(Checkpoint::new(processor_id, process_version, host_name))
        }

        async fn load_checkpoint(&self, _processor_id: &str) -> Result<Option<Checkpoint>> {
            Ok(None)
        }

        async fn persist_batch(
            &self,
            _table: &'static EntityTable,
            rows: &[Row],
            _checkpoint: &Checkpoint,
        ) -> Result<u64> {
            Ok(rows.len() as u64)
        }

        async fn run_maintenance(
            &self,
            task: MaintenanceTask,
            _tables: &[&'static EntityTable],
        ) -> Result<()> {
            if self.fail {
                return Err(SyncError::Transient {
                    message: "lock timeout".to_string(),
                });
            }
            self.tasks.lock().unwrap().push(task);
            Ok(())
        }
    }

    fn config() -> MaintenanceConfig {
        MaintenanceConfig {
            pause_timeout: Duration::from_secs(10),
            pause_poll_interval: Duration::from_millis(500),
            ..MaintenanceConfig::default()
        }
    }

    fn coordinator(
        store: Arc<RecordingStore>,
        coordination: Arc<Coordination>,
    ) -> MaintenanceCoordinator {
        MaintenanceCoordinator::new(
            config(),
            store,
            coordination,
            Vec::new(),
            CancellationToken::new(),
        )
    }

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_window() {
        let config = MaintenanceConfig::default();
        assert!(config.in_window(at(2, 0)));
        assert!(config.in_window(at(3, 59)));
        assert!(!config.in_window(at(4, 0)));
        assert!(!config.in_window(at(1, 59)));

        let wrapping = MaintenanceConfig {
            window_start: at(23, 0),
            window_duration: Duration::from_secs(2 * 60 * 60),
            ..MaintenanceConfig::default()
        };
        assert!(wrapping.in_window(at(23, 30)));
        assert!(wrapping.in_window(at(0, 30)));
        assert!(!wrapping.in_window(at(1, 0)));
        assert!(!wrapping.in_window(at(22, 59)));
    }

    #[tokio::test]
    async fn test_is_due_respects_interval_and_window() {
        let mut coordinator = coordinator(
            Arc::new(RecordingStore::default()),
            Arc::new(Coordination::new()),
        );
        let inside = Utc.with_ymd_and_hms(2025, 3, 1, 2, 30, 0).unwrap();
        let outside = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();

        assert!(coordinator.is_due(inside));
        assert!(!coordinator.is_due(outside));

        coordinator.last_run = Some(inside);
        assert!(!coordinator.is_due(inside + chrono::Duration::hours(1)));
        assert!(coordinator.is_due(inside + chrono::Duration::days(1)));
    }

    #[tokio::test]
    async fn test_first_pass_does_not_wait_for_processors() {
        let store = Arc::new(RecordingStore::default());
        let coordination = Arc::new(Coordination::new());
        coordination.register("Devices", true);

        let mut coordinator = coordinator(store.clone(), coordination.clone());
        let outcome = coordinator.run_pass(false).await;

        assert_eq!(outcome, MaintenanceOutcome::Completed);
        assert_eq!(store.tasks.lock().unwrap().len(), 3);
        assert!(!coordination.maintenance_requested());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pass_aborts_when_a_processor_does_not_pause() {
        let store = Arc::new(RecordingStore::default());
        let coordination = Arc::new(Coordination::new());
        for name in ["Devices", "StatusData", "FaultData"] {
            coordination.register(name, true);
        }

        let acker = coordination.clone();
        tokio::spawn(async move {
            while !acker.maintenance_requested() {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            acker.acknowledge_pause("Devices");
            acker.acknowledge_pause("StatusData");
        });

        let mut coordinator = coordinator(store.clone(), coordination.clone());
        let outcome = coordinator.run_pass(true).await;

        assert_eq!(
            outcome,
            MaintenanceOutcome::Aborted {
                not_paused: vec!["FaultData".to_string()]
            }
        );
        assert!(store.tasks.lock().unwrap().is_empty());
        assert!(!coordination.maintenance_requested());
        assert_eq!(coordination.state(), ConnectivityState::Normal);
        assert!(coordinator.last_run.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pass_runs_once_everyone_paused() {
        let store = Arc::new(RecordingStore::default());
        let coordination = Arc::new(Coordination::new());
        coordination.register("Devices", true);
        coordination.register("Users", false);

        let acker = coordination.clone();
        tokio::spawn(async move {
            while !acker.maintenance_requested() {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            acker.acknowledge_pause("Devices");
        });

        let mut coordinator = coordinator(store.clone(), coordination.clone());
        let outcome = coordinator.run_pass(true).await;

        assert_eq!(outcome, MaintenanceOutcome::Completed);
        assert_eq!(store.tasks.lock().unwrap().len(), 3);
        assert!(!coordination.maintenance_requested());
        assert!(!coordination.is_paused("Devices"));
    }

    #[tokio::test]
    async fn test_failed_pass_clears_pause_flag() {
        let store = Arc::new(RecordingStore {
            fail: true,
            ..RecordingStore::default()
        });
        let coordination = Arc::new(Coordination::new());

        let mut coordinator = coordinator(store, coordination.clone());
        let outcome = coordinator.run_pass(true).await;

        assert!(matches!(outcome, MaintenanceOutcome::Failed(_)));
        assert!(!coordination.maintenance_requested());
    }

    #[tokio::test]
    async fn test_connectivity_fault_survives_pause_end() {
        let coordination = Arc::new(Coordination::new());
        coordination.report_connectivity_loss(WaitReason::DatabaseUnavailable);

        let mut coordinator = coordinator(Arc::new(RecordingStore::default()), coordination.clone());
        coordinator.run_pass(true).await;

        assert_eq!(
            coordination.state(),
            ConnectivityState::Waiting(WaitReason::DatabaseUnavailable)
        );
    }

    #[tokio::test]
    async fn test_disabled_marks_startup_complete() {
        let coordination = Arc::new(Coordination::new());
        let coordinator = MaintenanceCoordinator::new(
            MaintenanceConfig {
                enabled: false,
                ..MaintenanceConfig::default()
            },
            Arc::new(RecordingStore::default()),
            coordination.clone(),
            Vec::new(),
            CancellationToken::new(),
        );
        coordinator.run().await.unwrap();
        assert!(coordination.initial_maintenance_complete());
    }
}
