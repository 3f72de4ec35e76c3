// Copyright (C) 2025 The fleetsync Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! JSON-RPC wire types.
//!
//! Requests are `POST /apiv1` with `{"method": ..., "params": {...}}`. Responses
//! carry either `result` or `error`; errors name the server-side exception in
//! `error.errors[].name` (older servers use `error.data.type`).
//!
//! Feed versions travel as 16-digit hexadecimal strings.

use fleetsync_core::FeedVersion;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ApiError, Result};

#[derive(Debug, Serialize)]
pub(crate) struct RpcRequest<'a> {
    pub method: &'a str,
    pub params: &'a Value,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RpcResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RpcErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<RpcErrorDetail>,
    #[serde(default)]
    data: Option<RpcErrorData>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorDetail {
    #[serde(default)]
    name: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcErrorData {
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

impl From<RpcErrorBody> for ApiError {
    fn from(body: RpcErrorBody) -> Self {
        let detail = body.errors.into_iter().next();
        let name = detail
            .as_ref()
            .map(|d| d.name.clone())
            .filter(|n| !n.is_empty())
            .or_else(|| body.data.and_then(|d| d.kind))
            .unwrap_or_else(|| "UnknownException".to_string());
        let message = detail
            .map(|d| d.message)
            .filter(|m| !m.is_empty())
            .unwrap_or(body.message);
        ApiError::Rpc { name, message }
    }
}

/// Session credentials returned by `Authenticate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    /// Database (tenant) name.
    pub database: String,
    /// User the session belongs to.
    pub user_name: String,
    /// Opaque session token.
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginResult {
    pub credentials: Credentials,
    /// `"ThisServer"` or the host that owns the database.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FeedResult {
    #[serde(default)]
    pub data: Vec<Value>,
    #[serde(default)]
    pub to_version: Value,
}

/// Encode a feed version the way the server expects it.
pub fn encode_version(version: FeedVersion) -> String {
    format!("{:016x}", version.get())
}

/// Decode a feed version from a hex string or a JSON number.
pub fn decode_version(value: &Value) -> Result<Option<FeedVersion>> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_i64()
            .map(|v| Some(FeedVersion(v)))
            .ok_or_else(|| ApiError::Decode(format!("feed version {} out of range", n))),
        Value::String(s) if s.is_empty() => Ok(None),
        Value::String(s) => u64::from_str_radix(s, 16)
            .map(|v| Some(FeedVersion(v as i64)))
            .map_err(|e| ApiError::Decode(format!("invalid feed version '{}': {}", s, e))),
        other => Err(ApiError::Decode(format!("invalid feed version {}", other))),
    }
}
