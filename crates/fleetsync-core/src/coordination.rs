// Copyright (C) 2025 The fleetsync Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process-wide connectivity and maintenance state.
//!
//! One [`Coordination`] is built at startup and handed to every processor and
//! to the maintenance coordinator as an `Arc`. It tracks:
//!
//! - the connectivity fault currently in effect, if any;
//! - whether maintenance has requested processors to pause;
//! - which processors are registered, whether they must pause for
//!   maintenance, and whether they have acknowledged a pause request.
//!
//! Connectivity faults take precedence over maintenance: a processor that cannot
//! reach storage cannot acknowledge a pause either.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Why processors must hold off on new work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitReason {
    /// The upstream API is unreachable.
    UpstreamUnavailable,
    /// The adapter database is unreachable.
    DatabaseUnavailable,
    /// Maintenance asked pause-requiring processors to stop writing.
    MaintenancePending,
}

impl fmt::Display for WaitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::UpstreamUnavailable => "upstream unavailable",
            Self::DatabaseUnavailable => "database unavailable",
            Self::MaintenancePending => "maintenance pending",
        };
        f.write_str(s)
    }
}

/// Effective state observed by processors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    /// Work may proceed.
    Normal,
    /// Work must wait for the reason to clear.
    Waiting(WaitReason),
}

#[derive(Debug, Clone, Copy)]
struct Registration {
    requires_pause: bool,
    paused: bool,
}

#[derive(Debug, Default)]
struct Inner {
    fault: Option<WaitReason>,
    maintenance_requested: bool,
    initial_maintenance_complete: bool,
    registered: BTreeMap<String, Registration>,
}

/// Shared coordination state. Cheap to lock; never held across an await.
#[derive(Debug, Default)]
pub struct Coordination {
    inner: Mutex<Inner>,
    pause_requested: Notify,
}

impl Coordination {
    /// Create an empty coordination state in `Normal`.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a processor. Re-registering replaces the previous entry.
    pub fn register(&self, name: &str, requires_pause: bool) {
        let mut inner = self.lock();
        inner.registered.insert(
            name.to_string(),
            Registration {
                requires_pause,
                paused: false,
            },
        );
        debug!(processor = %name, requires_pause = requires_pause, "Processor registered");
    }

    /// Remove a processor so maintenance no longer waits for it.
    pub fn unregister(&self, name: &str) {
        if self.lock().registered.remove(name).is_some() {
            debug!(processor = %name, "Processor unregistered");
        }
    }

    /// Current effective state.
    pub fn state(&self) -> ConnectivityState {
        let inner = self.lock();
        match (inner.fault, inner.maintenance_requested) {
            (Some(reason), _) => ConnectivityState::Waiting(reason),
            (None, true) => ConnectivityState::Waiting(WaitReason::MaintenancePending),
            (None, false) => ConnectivityState::Normal,
        }
    }

    /// Record a connectivity fault.
    ///
    /// The first fault stays in effect until it is cleared; a second report
    /// with a different reason is ignored. Returns whether the state changed.
    pub fn report_connectivity_loss(&self, reason: WaitReason) -> bool {
        if reason == WaitReason::MaintenancePending {
            return false;
        }
        let mut inner = self.lock();
        match inner.fault {
            None => {
                inner.fault = Some(reason);
                warn!(reason = %reason, "Connectivity lost, processors will wait");
                true
            }
            Some(_) => false,
        }
    }

    /// Clear a connectivity fault, but only if `reason` is the fault in effect.
    pub fn clear_connectivity_loss(&self, reason: WaitReason) -> bool {
        let mut inner = self.lock();
        if inner.fault == Some(reason) {
            inner.fault = None;
            info!(reason = %reason, "Connectivity restored");
            true
        } else {
            false
        }
    }

    /// Ask pause-requiring processors to stop writing.
    pub fn request_maintenance_pause(&self) {
        let mut inner = self.lock();
        inner.maintenance_requested = true;
        for registration in inner.registered.values_mut() {
            registration.paused = false;
        }
        info!("Maintenance pause requested");
        self.pause_requested.notify_waiters();
    }

    /// Let paused processors resume.
    pub fn end_maintenance_pause(&self) {
        let mut inner = self.lock();
        if inner.maintenance_requested {
            info!("Maintenance pause ended");
        }
        inner.maintenance_requested = false;
        for registration in inner.registered.values_mut() {
            registration.paused = false;
        }
    }

    /// Whether maintenance currently requests a pause.
    pub fn maintenance_requested(&self) -> bool {
        self.lock().maintenance_requested
    }

    /// Resolve once maintenance requests a pause, immediately if one already is.
    pub async fn wait_for_pause_request(&self) {
        let notified = self.pause_requested.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent request is not lost.
        notified.as_mut().enable();
        if self.maintenance_requested() {
            return;
        }
        notified.await;
    }

    /// A processor reports it has stopped writing.
    ///
    /// Ignored when no pause is requested, so a late acknowledgement cannot
    /// leak into the next maintenance pass.
    pub fn acknowledge_pause(&self, name: &str) {
        let mut inner = self.lock();
        if !inner.maintenance_requested {
            return;
        }
        if let Some(registration) = inner.registered.get_mut(name) {
            if !registration.paused {
                registration.paused = true;
                debug!(processor = %name, "Processor paused for maintenance");
            }
        }
    }

    /// A processor reports it is writing again.
    pub fn release_pause(&self, name: &str) {
        if let Some(registration) = self.lock().registered.get_mut(name) {
            registration.paused = false;
        }
    }

    /// Whether the named processor is currently acknowledged as paused.
    pub fn is_paused(&self, name: &str) -> bool {
        self.lock()
            .registered
            .get(name)
            .is_some_and(|r| r.paused)
    }

    /// Registered, pause-requiring processors that have not acknowledged.
    pub fn processors_not_paused(&self) -> Vec<String> {
        self.lock()
            .registered
            .iter()
            .filter(|(_, r)| r.requires_pause && !r.paused)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Names of every registered processor.
    pub fn registered(&self) -> Vec<String> {
        self.lock().registered.keys().cloned().collect()
    }

    /// Record that the startup maintenance pass has finished.
    pub fn mark_initial_maintenance_complete(&self) {
        self.lock().initial_maintenance_complete = true;
    }

    /// Whether the startup maintenance pass has finished.
    pub fn initial_maintenance_complete(&self) -> bool {
        self.lock().initial_maintenance_complete
    }
}
