// Copyright (C) 2025 The fleetsync Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! fleetsync Adapter - Telematics Synchronization Service
//!
//! Hosts one processor per upstream entity type and keeps an adapter
//! database (PostgreSQL or SQLite) in step with the upstream feed.
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`entities`] | upstream models, durable tables, mappers, allow-lists |
//! | [`processors`] | entity kinds, their prerequisites, processor construction |
//! | [`dependencies`] | foreign-key constraint ownership |
//! | [`config`] | `FLEETSYNC_*` environment configuration |
//! | [`migrations`] | embedded schema migrations per engine |
//! | [`db`] | pool setup and store selection |
//! | [`runtime`] | embeddable runtime with graceful shutdown |

#![deny(missing_docs)]

/// Environment configuration.
pub mod config;

/// Adapter database connection.
pub mod db;

/// Foreign-key constraint ownership.
pub mod dependencies;

/// Upstream entities and their mappers.
pub mod entities;

/// Embedded schema migrations.
pub mod migrations;

/// Processor registry.
pub mod processors;

/// Embeddable runtime.
pub mod runtime;

pub use config::{Config, ConfigError, DatabaseConfig, ProcessorSettings, SyncConfig};
pub use processors::EntityKind;
pub use runtime::{AdapterRuntime, ProcessorFailure};
