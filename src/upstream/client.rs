//! HTTP client for the upstream property-management API
//!
//! Every call is admitted through the [`RateLimiter`] and authenticated with
//! a bearer token from the tenant's [`TokenSupplier`]. A 401 invalidates the
//! cached token and the call is retried with a fresh one.

use bytes::Bytes;
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::token::TokenSupplier;
use crate::error::{GatewayError, Result};
use crate::metrics::Metrics;
use crate::middleware::rate_limiter::{RateLimitKeys, RateLimiter};
use crate::pagination::{Fetched, PageRequest};

/// Upstream client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// OAuth client-credentials endpoint
    #[serde(default = "default_token_url")]
    pub token_url: String,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_max_retries_on_unauthorized")]
    pub max_retries_on_unauthorized: u32,
}

fn default_base_url() -> String { "http://localhost:9000".to_string() }
fn default_token_url() -> String { "http://localhost:9000/oauth/token".to_string() }
fn default_timeout_ms() -> u64 { 10000 }
fn default_max_retries_on_unauthorized() -> u32 { 1 }

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token_url: default_token_url(),
            timeout_ms: default_timeout_ms(),
            max_retries_on_unauthorized: default_max_retries_on_unauthorized(),
        }
    }
}

/// Who a call is made for: bucket keys plus the tenant's token source
#[derive(Clone)]
pub struct UpstreamSession {
    pub keys: RateLimitKeys,
    pub tokens: Arc<dyn TokenSupplier>,
}

/// Rate-limited, authenticated upstream client
pub struct UpstreamClient {
    http: Client,
    base_url: String,
    limiter: Arc<RateLimiter>,
    max_retries_on_unauthorized: u32,
    metrics: Option<Arc<Metrics>>,
}

impl UpstreamClient {
    /// Create a new upstream client
    pub fn new(config: &UpstreamConfig, limiter: Arc<RateLimiter>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| GatewayError::Internal(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            limiter,
            max_retries_on_unauthorized: config.max_retries_on_unauthorized,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Underlying HTTP client, shared with the token exchange
    pub fn http(&self) -> &Client {
        &self.http
    }

    pub async fn get(
        &self,
        session: &UpstreamSession,
        path: &str,
        query: &[(String, String)],
    ) -> Result<Value> {
        self.request(session, Method::GET, path, query, None).await
    }

    pub async fn post(&self, session: &UpstreamSession, path: &str, body: &Value) -> Result<Value> {
        self.request(session, Method::POST, path, &[], Some(body)).await
    }

    pub async fn put(&self, session: &UpstreamSession, path: &str, body: &Value) -> Result<Value> {
        self.request(session, Method::PUT, path, &[], Some(body)).await
    }

    pub async fn delete(&self, session: &UpstreamSession, path: &str) -> Result<Value> {
        self.request(session, Method::DELETE, path, &[], None).await
    }

    /// Fetch one window of a collection for the pagination service
    pub async fn list(
        &self,
        session: &UpstreamSession,
        path: &str,
        request: &PageRequest,
    ) -> Result<Fetched<Value>> {
        let body = self.get(session, path, &list_query(request)).await?;
        parse_list(body)
    }

    /// Issue a request, retrying with a fresh token after a 401
    pub async fn request(
        &self,
        session: &UpstreamSession,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut retries_left = self.max_retries_on_unauthorized;

        loop {
            let token = session.tokens.get_token().await?;
            let (status, bytes) = self
                .limiter
                .scoped(
                    &session.keys,
                    self.execute(&method, &url, query, body, token.secret()),
                )
                .await?;

            if status == StatusCode::UNAUTHORIZED && retries_left > 0 {
                warn!(url = %url, "upstream rejected token, refreshing");
                session.tokens.invalidate().await;
                retries_left -= 1;
                continue;
            }

            if !status.is_success() {
                return Err(GatewayError::Upstream {
                    status: status.as_u16(),
                    body: String::from_utf8_lossy(&bytes).into_owned(),
                });
            }

            if bytes.is_empty() {
                return Ok(Value::Null);
            }
            return Ok(serde_json::from_slice(&bytes)?);
        }
    }

    async fn execute(
        &self,
        method: &Method,
        url: &str,
        query: &[(String, String)],
        body: Option<&Value>,
        token: &str,
    ) -> Result<(StatusCode, Bytes)> {
        let start = Instant::now();
        let mut builder = self
            .http
            .request(method.clone(), url)
            .bearer_auth(token)
            .query(query);
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let outcome = match builder.send().await {
            Ok(response) => {
                let status = response.status();
                response.bytes().await.map(|bytes| (status, bytes))
            }
            Err(e) => Err(e),
        };

        let status = outcome.as_ref().ok().map(|(s, _)| s.as_u16());
        if let Some(metrics) = &self.metrics {
            metrics.record_upstream(method.as_str(), status, start.elapsed());
        }
        debug!(method = %method, url, status, "upstream call finished");

        outcome.map_err(|e| GatewayError::Network(e.to_string()))
    }
}

/// Query parameters for a collection window.
///
/// Filters are forwarded as plain query parameters; non-string values are
/// sent as their JSON text.
pub fn list_query(request: &PageRequest) -> Vec<(String, String)> {
    let mut query = vec![
        ("offset".to_string(), request.offset.to_string()),
        ("limit".to_string(), request.limit.to_string()),
    ];
    if let Some(order_by) = &request.order_by {
        query.push(("order_by".to_string(), order_by.clone()));
    }
    if let Some(filters) = &request.filters {
        for (key, value) in filters {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            query.push((key.clone(), value));
        }
    }
    query
}

const ITEM_KEYS: &[&str] = &["data", "items", "results"];
const TOTAL_KEYS: &[&str] = &["total", "total_count", "count"];

/// Accept either a bare array or an object wrapping one
pub fn parse_list(body: Value) -> Result<Fetched<Value>> {
    match body {
        Value::Array(items) => Ok(Fetched {
            items,
            total_count: None,
        }),
        Value::Object(mut object) => {
            let items = ITEM_KEYS
                .iter()
                .find_map(|key| match object.remove(*key) {
                    Some(Value::Array(items)) => Some(items),
                    _ => None,
                })
                .ok_or_else(|| {
                    GatewayError::Upstream {
                        status: 200,
                        body: "list response carries no item array".to_string(),
                    }
                })?;
            Ok(Fetched {
                items,
                total_count: total_count(&object),
            })
        }
        _ => Err(GatewayError::Upstream {
            status: 200,
            body: "list response is not a collection".to_string(),
        }),
    }
}

fn total_count(object: &Map<String, Value>) -> Option<u64> {
    TOTAL_KEYS
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_u64))
}
