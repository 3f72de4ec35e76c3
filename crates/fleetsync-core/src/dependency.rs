// Copyright (C) 2025 The fleetsync Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Foreign-key constraint ownership and dependency backoff.
//!
//! When a merge fails because a referenced parent row does not exist yet, the
//! failing processor looks the violated constraint up in the [`DependencyMap`]
//! to find the processor that owns the parent table. It then waits, bounded and
//! cancellable, for that owner's checkpoint to move past where it was at the
//! time of the failure, and retries extraction on its next iteration.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::checkpoint::Checkpoint;
use crate::error::Result;
use crate::persistence::AdapterStore;
use crate::shutdown::sleep_cancellable;

/// Immutable map from constraint name to owning processor.
#[derive(Debug, Clone, Default)]
pub struct DependencyMap {
    owners: HashMap<String, String>,
}

impl DependencyMap {
    /// Build a map from `(constraint, owner)` pairs.
    pub fn new<I, C, O>(entries: I) -> Self
    where
        I: IntoIterator<Item = (C, O)>,
        C: Into<String>,
        O: Into<String>,
    {
        Self {
            owners: entries
                .into_iter()
                .map(|(c, o)| (c.into(), o.into()))
                .collect(),
        }
    }

    /// Processor that owns the parent side of `constraint`.
    ///
    /// PostgreSQL folds unquoted identifiers to lower case, so the lookup
    /// falls back to a case-insensitive match.
    pub fn try_get_owner(&self, constraint: &str) -> Option<&str> {
        if constraint.is_empty() {
            return None;
        }
        self.owners
            .get(constraint)
            .or_else(|| {
                self.owners
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(constraint))
                    .map(|(_, owner)| owner)
            })
            .map(String::as_str)
    }

    /// Number of mapped constraints.
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    /// Whether no constraint is mapped.
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

/// Bounds for waiting on a dependency owner.
#[derive(Debug, Clone, Copy)]
pub struct DependencyWait {
    /// Give up after this long.
    pub timeout: Duration,
    /// How often the owner's tracking row is read.
    pub poll_interval: Duration,
}

impl Default for DependencyWait {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// How a wait on a dependency owner ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerWaitOutcome {
    /// The owner committed progress past the baseline.
    Advanced,
    /// The timeout elapsed first.
    TimedOut,
    /// Shutdown was requested.
    Cancelled,
}

/// Wait until `owner`'s checkpoint moves past `baseline`.
///
/// `baseline` is the owner's checkpoint read when the violation was observed;
/// `None` means the owner had no tracking row yet, so any recorded cycle counts.
pub async fn wait_for_owner(
    store: &dyn AdapterStore,
    owner: &str,
    baseline: Option<Checkpoint>,
    wait: DependencyWait,
    shutdown: &CancellationToken,
) -> Result<OwnerWaitOutcome> {
    let baseline = baseline.unwrap_or_else(|| Checkpoint::new(owner, "", ""));
    let deadline = Instant::now() + wait.timeout;

    loop {
        let current = store.load_checkpoint(owner).await?;
        if current.as_ref().is_some_and(|cp| cp.is_past(&baseline)) {
            debug!(owner = %owner, "Dependency owner advanced");
            return Ok(OwnerWaitOutcome::Advanced);
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            warn!(
                owner = %owner,
                timeout_secs = wait.timeout.as_secs(),
                "Dependency owner did not advance before timeout"
            );
            return Ok(OwnerWaitOutcome::TimedOut);
        }

        if !sleep_cancellable(shutdown, wait.poll_interval.min(remaining)).await {
            return Ok(OwnerWaitOutcome::Cancelled);
        }
    }
}
