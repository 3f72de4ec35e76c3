// Copyright (C) 2025 The fleetsync Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! fleetsync Core - Synchronization Engine
//!
//! This crate holds everything the sync processors share: incremental feed
//! extraction, the process-wide connectivity/maintenance state, foreign-key
//! dependency backoff, and the staging-merge persistence protocol.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐        ┌──────────────────────────┐
//! │   Upstream telematics    │        │  MaintenanceCoordinator  │
//! │   API (FeedSource)       │        │  pause → upkeep → resume │
//! └──────────────────────────┘        └──────────────────────────┘
//!              │                                   │
//!              ▼                                   ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │          EntityProcessor<M> × N  (one per entity type)        │
//! │   gate → prerequisites → fetch → map → persist → throttle     │
//! │         ▲ Coordination (shared)   ▲ DependencyMap (shared)    │
//! └──────────────────────────────────────────────────────────────┘
//!              │
//!              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │   AdapterStore: truncate stg_<e> → bulk load → merge →        │
//! │   service_tracking, one transaction, wrapped by with_retry    │
//! │   (PostgresStore | SqliteStore)                               │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Error handling
//!
//! Every failure is a [`SyncError`]. The processor loop branches on
//! [`SyncError::class`]:
//!
//! | Class | Reaction |
//! |-------|----------|
//! | `Transient` | absorbed by [`with_retry`] around each transaction |
//! | `Connectivity` | shared state moves to `Waiting`, cursor rolls back |
//! | `ConstraintViolation` | wait for the constraint's owner, then retry |
//! | `Fatal` | logged with its cause chain, processor stops |
//!
//! # Delivery guarantees
//!
//! The checkpoint is written in the same transaction as the merged rows, and
//! the feed cursor always restarts from the last committed checkpoint after a
//! failure. Delivery is at-least-once; the merge is idempotent, so replays
//! never duplicate rows.

#![deny(missing_docs)]

/// Per-processor checkpoints and feed versions.
pub mod checkpoint;

/// Process-wide connectivity and maintenance state.
pub mod coordination;

/// Constraint ownership and dependency backoff.
pub mod dependency;

/// Entity table metadata, row values, and the mapper trait.
pub mod entity;

/// Error types and classification.
pub mod error;

/// Upstream feed abstraction and cursor.
pub mod feed;

/// Maintenance coordinator.
pub mod maintenance;

/// Adapter database stores (PostgreSQL, SQLite).
pub mod persistence;

/// Processor loop.
pub mod processor;

/// Retry with capped exponential backoff.
pub mod retry;

/// Cancellable sleeps.
pub mod shutdown;

pub use checkpoint::{Checkpoint, FeedVersion};
pub use coordination::{ConnectivityState, Coordination, WaitReason};
pub use dependency::{DependencyMap, DependencyWait};
pub use entity::{Column, ColumnType, EntityMapper, EntityTable, ForeignKey, Row, SqlValue};
pub use error::{ErrorClass, Resource, Result, SyncError};
pub use feed::{FeedCursor, FeedCursorConfig, FeedPage, FeedRequest, FeedSource};
pub use maintenance::{MaintenanceConfig, MaintenanceCoordinator, MaintenanceOutcome};
pub use persistence::{
    AdapterStore, MaintenanceTask, PostgresStore, ProviderType, SqliteStore, StoreConfig,
};
pub use processor::{
    EntityProcessor, ProcessorConfig, ProcessorContext, ProcessorState, SyncProcessor,
};
pub use retry::{RetryPolicy, with_retry};
