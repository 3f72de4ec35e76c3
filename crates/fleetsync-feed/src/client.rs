// Copyright (C) 2025 The fleetsync Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Upstream API client.

use std::time::Duration;

use async_trait::async_trait;
use fleetsync_core::{FeedPage, FeedRequest, FeedSource, FeedVersion};
use serde_json::{Map, Value, json};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{ApiError, Result};
use crate::rpc::{
    Credentials, FeedResult, LoginResult, RpcRequest, RpcResponse, decode_version, encode_version,
};

/// Longest response body kept in an [`ApiError::Http`].
const MAX_ERROR_BODY: usize = 512;

/// Connection settings for the upstream API.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server host name, or a full base URL (`http://127.0.0.1:8080`).
    pub server: String,
    /// Database (tenant) name.
    pub database: String,
    /// User name.
    pub user_name: String,
    /// Password.
    pub password: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
}

impl ClientConfig {
    /// Settings with default timeouts.
    pub fn new(
        server: impl Into<String>,
        database: impl Into<String>,
        user_name: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            database: database.into(),
            user_name: user_name.into(),
            password: password.into(),
            request_timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// JSON-RPC endpoint for a server name or base URL.
fn endpoint_for(server: &str) -> String {
    let server = server.trim().trim_end_matches('/');
    if server.starts_with("http://") || server.starts_with("https://") {
        format!("{}/apiv1", server)
    } else {
        format!("https://{}/apiv1", server)
    }
}

fn with_credentials(params: &Value, credentials: &Credentials) -> Result<Value> {
    let mut object = match params {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            return Err(ApiError::Configuration(format!(
                "RPC params must be an object, got {}",
                other
            )));
        }
    };
    object.insert("credentials".to_string(), serde_json::to_value(credentials)?);
    Ok(Value::Object(object))
}

#[derive(Debug)]
struct Session {
    endpoint: String,
    credentials: Option<Credentials>,
}

/// Authenticated client for the upstream telematics API.
///
/// The session is created lazily on the first call and shared by every
/// processor. An `InvalidUserException` drops the session and the call is
/// retried once with fresh credentials.
pub struct ApiClient {
    http: reqwest::Client,
    config: ClientConfig,
    session: RwLock<Session>,
}

impl ApiClient {
    /// Create a client. No request is sent until the first call.
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.server.trim().is_empty() {
            return Err(ApiError::Configuration("server must not be empty".to_string()));
        }
        if config.database.trim().is_empty() || config.user_name.trim().is_empty() {
            return Err(ApiError::Configuration(
                "database and user name must not be empty".to_string(),
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ApiError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        let endpoint = endpoint_for(&config.server);
        Ok(Self {
            http,
            config,
            session: RwLock::new(Session {
                endpoint,
                credentials: None,
            }),
        })
    }

    /// Current JSON-RPC endpoint.
    pub async fn endpoint(&self) -> String {
        self.session.read().await.endpoint.clone()
    }

    /// Sign in and store the session.
    ///
    /// When the server reports that the database lives elsewhere, later calls
    /// go to that server.
    pub async fn authenticate(&self) -> Result<Credentials> {
        let endpoint = endpoint_for(&self.config.server);
        let params = json!({
            "userName": self.config.user_name,
            "password": self.config.password,
            "database": self.config.database,
        });

        let result = match self.post(&endpoint, "Authenticate", &params).await {
            Ok(result) => result,
            Err(err) if err.is_invalid_session() => {
                return Err(ApiError::Authentication(err.to_string()));
            }
            Err(err) => return Err(err),
        };
        let login: LoginResult = serde_json::from_value(result)?;

        let endpoint = match login.path.as_deref() {
            Some(path) if !path.is_empty() && path != "ThisServer" => endpoint_for(path),
            _ => endpoint,
        };

        info!(
            database = %login.credentials.database,
            user = %login.credentials.user_name,
            endpoint = %endpoint,
            "Authenticated with upstream API"
        );

        let mut session = self.session.write().await;
        session.endpoint = endpoint;
        session.credentials = Some(login.credentials.clone());
        Ok(login.credentials)
    }

    async fn session_credentials(&self) -> Result<(String, Credentials)> {
        {
            let session = self.session.read().await;
            if let Some(credentials) = &session.credentials {
                return Ok((session.endpoint.clone(), credentials.clone()));
            }
        }
        let credentials = self.authenticate().await?;
        Ok((self.endpoint().await, credentials))
    }

    /// Drop the session, unless another task already replaced it.
    async fn invalidate(&self, session_id: &str) {
        let mut session = self.session.write().await;
        if session
            .credentials
            .as_ref()
            .is_some_and(|c| c.session_id == session_id)
        {
            session.credentials = None;
        }
    }

    async fn post(&self, endpoint: &str, method: &str, params: &Value) -> Result<Value> {
        debug!(method = method, "Calling upstream API");
        let response = self
            .http
            .post(endpoint)
            .json(&RpcRequest { method, params })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(ApiError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let body: RpcResponse = response.json().await?;
        if let Some(error) = body.error {
            return Err(error.into());
        }
        body.result
            .ok_or_else(|| ApiError::Decode("response has neither result nor error".to_string()))
    }

    /// Call an authenticated method, re-authenticating once on an expired session.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let (endpoint, credentials) = self.session_credentials().await?;
        let request = with_credentials(&params, &credentials)?;

        match self.post(&endpoint, method, &request).await {
            Err(err) if err.is_invalid_session() => {
                warn!(method = method, "Upstream session expired, re-authenticating");
                self.invalidate(&credentials.session_id).await;
                let (endpoint, credentials) = self.session_credentials().await?;
                let request = with_credentials(&params, &credentials)?;
                self.post(&endpoint, method, &request).await
            }
            other => other,
        }
    }

    /// `GetFeed` for one type, with an optional search filter.
    pub async fn get_feed_page(
        &self,
        type_name: &str,
        from_version: Option<FeedVersion>,
        results_limit: u32,
        search: Option<Value>,
    ) -> Result<FeedPage> {
        let mut params = Map::new();
        params.insert("typeName".to_string(), json!(type_name));
        params.insert("resultsLimit".to_string(), json!(results_limit));
        if let Some(version) = from_version {
            params.insert("fromVersion".to_string(), json!(encode_version(version)));
        }
        if let Some(search) = search {
            params.insert("search".to_string(), search);
        }

        let result = self.call("GetFeed", Value::Object(params)).await?;
        let feed: FeedResult = serde_json::from_value(result)?;
        let to_version = decode_version(&feed.to_version)?;

        debug!(
            type_name = type_name,
            rows = feed.data.len(),
            to_version = ?to_version,
            "Feed page received"
        );
        Ok(FeedPage {
            data: feed.data,
            to_version,
        })
    }

    /// `ExecuteMultiCall`: several lookups in one round trip.
    pub async fn execute_multi_call(&self, requests: &[FeedRequest]) -> Result<Vec<Value>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        let calls: Vec<Value> = requests
            .iter()
            .map(|r| json!({ "method": r.method, "params": r.params }))
            .collect();

        let result = self
            .call("ExecuteMultiCall", json!({ "calls": calls }))
            .await?;
        match result {
            Value::Array(results) if results.len() == requests.len() => Ok(results),
            Value::Array(results) => Err(ApiError::Decode(format!(
                "multi-call returned {} results for {} calls",
                results.len(),
                requests.len()
            ))),
            other => Err(ApiError::Decode(format!(
                "multi-call result is not an array: {}",
                other
            ))),
        }
    }

    /// `GetVersion`: unauthenticated server version, used as a reachability probe.
    pub async fn get_version(&self) -> Result<String> {
        let endpoint = self.endpoint().await;
        let result = self.post(&endpoint, "GetVersion", &json!({})).await?;
        Ok(match result {
            Value::String(version) => version,
            other => other.to_string(),
        })
    }
}

#[async_trait]
impl FeedSource for ApiClient {
    async fn get_feed(
        &self,
        entity_type: &str,
        from_version: Option<FeedVersion>,
        limit: u32,
    ) -> fleetsync_core::Result<FeedPage> {
        Ok(self
            .get_feed_page(entity_type, from_version, limit, None)
            .await?)
    }

    async fn multi_call(&self, requests: &[FeedRequest]) -> fleetsync_core::Result<Vec<Value>> {
        Ok(self.execute_multi_call(requests).await?)
    }

    async fn probe(&self) -> fleetsync_core::Result<()> {
        self.get_version().await?;
        Ok(())
    }
}
