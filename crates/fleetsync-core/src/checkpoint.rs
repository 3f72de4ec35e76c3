// Copyright (C) 2025 The fleetsync Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-processor checkpoints.
//!
//! A checkpoint is the row a processor owns in the `service_tracking` table.
//! It records the last feed version that was durably merged, so a restarted
//! process resumes exactly where the last committed batch ended.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque, monotonically increasing position in an entity type's change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedVersion(pub i64);

impl FeedVersion {
    /// Raw token value.
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for FeedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for FeedVersion {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Durable cursor of one processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    /// Processor that owns this row.
    pub processor_id: String,
    /// Feed version reached by the last committed batch.
    pub last_feed_version: Option<FeedVersion>,
    /// When the batch that produced `last_feed_version` was retrieved.
    pub last_retrieval_utc: Option<DateTime<Utc>>,
    /// Wall-clock time of the last committed persist cycle.
    pub last_processed_utc: Option<DateTime<Utc>>,
    /// Version of the process that last wrote this row.
    pub process_version: String,
    /// Machine that last wrote this row.
    pub host_name: String,
}

impl Checkpoint {
    /// A checkpoint that has never recorded any progress.
    pub fn new(
        processor_id: impl Into<String>,
        process_version: impl Into<String>,
        host_name: impl Into<String>,
    ) -> Self {
        Self {
            processor_id: processor_id.into(),
            last_feed_version: None,
            last_retrieval_utc: None,
            last_processed_utc: None,
            process_version: process_version.into(),
            host_name: host_name.into(),
        }
    }

    /// Whether the processor has committed at least one cycle.
    pub fn has_processed(&self) -> bool {
        self.last_processed_utc.is_some()
    }

    /// The checkpoint that results from committing a batch retrieved at
    /// `retrieved_at` and ending at `version`.
    pub fn advanced_to(
        &self,
        version: Option<FeedVersion>,
        retrieved_at: DateTime<Utc>,
        processed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            // A page without a version never moves the cursor backwards.
            last_feed_version: version.or(self.last_feed_version),
            last_retrieval_utc: Some(retrieved_at),
            last_processed_utc: Some(processed_at),
            ..self.clone()
        }
    }

    /// Whether this checkpoint shows progress beyond `baseline`.
    ///
    /// Used by dependent processors waiting for an owner to catch up: either
    /// the owner's feed moved, or it completed another cycle.
    pub fn is_past(&self, baseline: &Checkpoint) -> bool {
        let version_moved = match (self.last_feed_version, baseline.last_feed_version) {
            (Some(current), Some(base)) => current > base,
            (Some(_), None) => true,
            _ => false,
        };
        let processed_since = match (self.last_processed_utc, baseline.last_processed_utc) {
            (Some(current), Some(base)) => current > base,
            (Some(_), None) => true,
            _ => false,
        };
        version_moved || processed_since
    }
}
