// Copyright (C) 2025 The fleetsync Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the upstream API client.

use fleetsync_core::{Resource, SyncError};
use thiserror::Error;

/// Result type using [`ApiError`].
pub type Result<T> = std::result::Result<T, ApiError>;

/// RPC exception names that mean the server cannot serve requests right now.
const UNAVAILABLE_EXCEPTIONS: &[&str] = &[
    "DbUnavailableException",
    "ServiceUnavailableException",
    "OverLimitException",
];

/// RPC exception name for an expired or unknown session.
pub const INVALID_USER_EXCEPTION: &str = "InvalidUserException";

/// Errors produced by the upstream API client.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request never produced a response (connect failure, reset, timeout).
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),

    /// The server answered with a non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Http {
        /// Status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// The server answered with a JSON-RPC error.
    #[error("{name}: {message}")]
    Rpc {
        /// Exception name reported by the server.
        name: String,
        /// Error message.
        message: String,
    },

    /// Authentication was rejected.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The response could not be decoded.
    #[error("invalid response: {0}")]
    Decode(String),

    /// Invalid client configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ApiError {
    /// Whether the failure means the upstream API is unreachable.
    pub fn is_connectivity(&self) -> bool {
        match self {
            Self::Transport(err) => {
                err.is_connect() || err.is_timeout() || err.is_request() || err.is_body()
            }
            Self::Http { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::Rpc { name, .. } => UNAVAILABLE_EXCEPTIONS.contains(&name.as_str()),
            _ => false,
        }
    }

    /// Whether the server rejected the session.
    pub fn is_invalid_session(&self) -> bool {
        matches!(self, Self::Rpc { name, .. } if name == INVALID_USER_EXCEPTION)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Transport(err)
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Decode(err.to_string())
    }
}

impl From<ApiError> for SyncError {
    fn from(err: ApiError) -> Self {
        if err.is_connectivity() {
            SyncError::connectivity(Resource::Upstream, err.to_string())
        } else if let ApiError::Configuration(message) = err {
            SyncError::Configuration(message)
        } else {
            SyncError::Upstream(err.to_string())
        }
    }
}
