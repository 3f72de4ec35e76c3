// Copyright (C) 2025 The fleetsync Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Incremental extraction from the upstream change feed.
//!
//! [`FeedSource`] is the boundary to the upstream API: an opaque paged source
//! keyed by a [`FeedVersion`]. [`FeedCursor`] wraps one entity type's
//! extraction and tracks two positions:
//!
//! - the **committed** position, which only moves when the processor reports a
//!   durable write via [`FeedCursor::commit`];
//! - the **read** position, which moves with every fetched page.
//!
//! After a failure the processor calls [`FeedCursor::rollback`] so the next
//! fetch starts exactly at the committed position.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tracing::debug;

use crate::checkpoint::FeedVersion;
use crate::error::{Result, SyncError};

/// One page returned by the upstream feed.
#[derive(Debug, Clone, Default)]
pub struct FeedPage {
    /// Raw upstream objects, in feed order.
    pub data: Vec<serde_json::Value>,
    /// Version to request next time.
    pub to_version: Option<FeedVersion>,
}

/// A per-key lookup sent through [`FeedSource::multi_call`].
#[derive(Debug, Clone, PartialEq)]
pub struct FeedRequest {
    /// API method name.
    pub method: String,
    /// Method parameters.
    pub params: serde_json::Value,
}

/// The upstream telematics API, seen as an opaque paged source.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch up to `limit` objects of `entity_type` changed since `from_version`.
    ///
    /// Connectivity failures must be reported as
    /// [`SyncError::Connectivity`] with [`Resource::Upstream`](crate::error::Resource::Upstream).
    async fn get_feed(
        &self,
        entity_type: &str,
        from_version: Option<FeedVersion>,
        limit: u32,
    ) -> Result<FeedPage>;

    /// Execute several lookups in one round trip, results in request order.
    async fn multi_call(&self, requests: &[FeedRequest]) -> Result<Vec<serde_json::Value>>;

    /// Cheap reachability check used while waiting for connectivity to return.
    async fn probe(&self) -> Result<()>;
}

/// A batch decoded by a [`FeedCursor`].
#[derive(Debug)]
pub struct FeedBatch<T> {
    /// Decoded upstream objects.
    pub items: Vec<T>,
    /// Feed position reached after consuming `items`.
    pub to_version: Option<FeedVersion>,
    /// When the page was retrieved.
    pub retrieved_at: DateTime<Utc>,
    /// Whether the feed returned fewer objects than the caught-up threshold.
    pub caught_up: bool,
}

/// Cursor settings for one entity type.
#[derive(Debug, Clone)]
pub struct FeedCursorConfig {
    /// Maximum objects requested per page.
    pub batch_size: u32,
    /// Pages smaller than this mean the feed is caught up.
    pub caught_up_threshold: u32,
    /// Delay between pages once caught up.
    pub feed_interval: Duration,
}

impl Default for FeedCursorConfig {
    fn default() -> Self {
        Self {
            batch_size: 5000,
            caught_up_threshold: 1000,
            feed_interval: Duration::from_secs(30),
        }
    }
}

/// Incremental reader over one entity type's feed.
pub struct FeedCursor<T> {
    entity_type: String,
    source: Arc<dyn FeedSource>,
    config: FeedCursorConfig,
    committed: Option<FeedVersion>,
    read: Option<FeedVersion>,
    next_due: Option<Instant>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> FeedCursor<T> {
    /// Create a cursor that starts at the beginning of the feed.
    pub fn new(
        entity_type: impl Into<String>,
        source: Arc<dyn FeedSource>,
        config: FeedCursorConfig,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            source,
            config,
            committed: None,
            read: None,
            next_due: None,
            _marker: PhantomData,
        }
    }

    /// Position both the read and committed markers at `starting_position`.
    pub fn initialize(&mut self, starting_position: Option<FeedVersion>) {
        self.committed = starting_position;
        self.read = starting_position;
        self.next_due = None;
    }

    /// Last durably committed position.
    pub fn committed(&self) -> Option<FeedVersion> {
        self.committed
    }

    /// Position the next fetch will start from.
    pub fn position(&self) -> Option<FeedVersion> {
        self.read
    }

    /// Time left until the cursor is due for another fetch.
    pub fn time_until_due(&self) -> Duration {
        self.next_due
            .map(|due| due.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO)
    }

    /// Fetch the next page starting at the read position.
    ///
    /// The read position moves to the page's `to_version`; the committed
    /// position does not move until [`commit`](Self::commit).
    pub async fn fetch_next_batch(&mut self) -> Result<FeedBatch<T>> {
        let retrieved_at = Utc::now();
        let page = self
            .source
            .get_feed(&self.entity_type, self.read, self.config.batch_size)
            .await?;

        let fetched = page.data.len();
        let items = page
            .data
            .into_iter()
            .map(|value| {
                serde_json::from_value::<T>(value)
                    .map_err(|e| SyncError::mapping(self.entity_type.clone(), e.to_string()))
            })
            .collect::<Result<Vec<T>>>()?;

        if page.to_version.is_some() {
            self.read = page.to_version;
        }

        let caught_up = (fetched as u64) < u64::from(self.config.caught_up_threshold);
        self.next_due = if caught_up {
            Some(Instant::now() + self.config.feed_interval)
        } else {
            None
        };

        debug!(
            entity_type = %self.entity_type,
            fetched = fetched,
            to_version = ?self.read,
            caught_up = caught_up,
            "Fetched feed page"
        );

        Ok(FeedBatch {
            items,
            to_version: page.to_version.or(self.read),
            retrieved_at,
            caught_up,
        })
    }

    /// Record that everything up to `position` is durably committed.
    ///
    /// The read position never trails the committed one, even when the server
    /// reported an older version than the checkpoint.
    pub fn commit(&mut self, position: Option<FeedVersion>) {
        if position.is_some() {
            self.committed = position;
            self.read = self.read.max(position);
        }
    }

    /// Return to the last committed position and make the cursor due now.
    ///
    /// Must be called once after a transient upstream or storage failure,
    /// before the next fetch.
    pub fn rollback(&mut self) {
        debug!(
            entity_type = %self.entity_type,
            from = ?self.read,
            to = ?self.committed,
            "Rolling back feed cursor"
        );
        self.read = self.committed;
        self.next_due = None;
    }
}
