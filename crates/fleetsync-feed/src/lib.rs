// Copyright (C) 2025 The fleetsync Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! fleetsync Feed - Upstream API Client
//!
//! JSON-RPC client for the upstream telematics API, implementing
//! [`fleetsync_core::FeedSource`].
//!
//! | Method | Purpose |
//! |--------|---------|
//! | `Authenticate` | create a session (`credentials.sessionId`) |
//! | `GetFeed` | page through an entity type's change feed from a version |
//! | `ExecuteMultiCall` | batch several lookups in one request |
//! | `GetVersion` | unauthenticated reachability probe |
//!
//! Transport failures, HTTP 5xx/408/429, and server-unavailable RPC exceptions
//! surface as upstream connectivity loss; everything else is fatal.

#![deny(missing_docs)]

/// API client and connection settings.
pub mod client;

/// Client error types.
pub mod error;

/// JSON-RPC wire types and feed version codec.
pub mod rpc;

pub use client::{ApiClient, ClientConfig};
pub use error::{ApiError, Result};
pub use rpc::Credentials;
