//! Route handlers
//!
//! Handlers stay thin: they turn the request into an upstream call through
//! the pagination service or the upstream client and return raw JSON. The
//! gateway middleware shapes whatever they return.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::models::HealthResponse;
use crate::error::{GatewayError, Result};
use crate::metrics::Metrics;
use crate::middleware::auth::TenantContext;
use crate::middleware::rate_limiter::{RateLimitKeys, RateLimiter};
use crate::pagination::{Page, PageRequest, PaginationService};
use crate::policy::PolicyStore;
use crate::upstream::client::{UpstreamClient, UpstreamSession};
use crate::upstream::token::TokenRegistry;

/// Query parameters consumed by the gateway rather than forwarded as filters
const RESERVED_PARAMS: &[&str] = &["cursor", "page_size", "order_by", "full"];

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub pagination: Arc<PaginationService>,
    pub upstream: Arc<UpstreamClient>,
    pub tokens: Arc<TokenRegistry>,
    pub policies: Arc<PolicyStore>,
    pub limiter: Arc<RateLimiter>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    fn session(&self, tenant: &TenantContext) -> UpstreamSession {
        UpstreamSession {
            keys: RateLimitKeys::new(
                tenant.tenant_id.clone(),
                tenant.credentials.account_id.clone(),
            ),
            tokens: self.tokens.supplier_for(&tenant.tenant_id, &tenant.credentials),
        }
    }
}

/// Health check
///
/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        policy_version: state.policies.version(),
        in_flight: state.limiter.in_flight(),
    })
}

/// Prometheus metrics
///
/// GET /metrics
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.export_prometheus(),
    )
}

/// List a collection page by page
///
/// GET /api/v1/:resource
pub async fn list_resource(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Path(resource): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>> {
    validate_segment(&resource)?;
    let endpoint = format!("/api/v1/{}", resource);
    let upstream_path = format!("/{}", resource);
    let session = state.session(&tenant);

    let policy = state.policies.resolve(&endpoint);
    if !policy.pagination_enabled {
        debug!(endpoint = %endpoint, "pagination disabled, forwarding query");
        let query = forwarded_query(&params);
        let body = state.upstream.get(&session, &upstream_path, &query).await?;
        return Ok(Json(body));
    }

    let page_size = params.get("page_size").and_then(|s| s.parse::<i64>().ok());
    let fetch = |request: PageRequest| {
        let upstream = state.upstream.clone();
        let session = session.clone();
        let upstream_path = upstream_path.clone();
        async move { upstream.list(&session, &upstream_path, &request).await }
    };

    let page: Result<Page<Value>> = match params.get("cursor") {
        Some(cursor) => {
            state
                .pagination
                .next_page(&endpoint, cursor, page_size, fetch)
                .await
        }
        None => {
            let order_by = params.get("order_by").cloned();
            state
                .pagination
                .first_page(&endpoint, page_size, order_by, filters_from(&params), fetch)
                .await
        }
    };

    let page = page.map_err(|e| {
        if let GatewayError::Cursor(cursor_error) = &e {
            state.metrics.record_cursor_error(cursor_error.kind());
        }
        e
    })?;

    state.metrics.record_page_served();
    info!(
        tenant_id = %tenant.tenant_id,
        endpoint = %endpoint,
        returned = page.items.len(),
        has_more = page.meta.has_more,
        "page served"
    );
    Ok(Json(serde_json::to_value(page)?))
}

/// Fetch one object
///
/// GET /api/v1/:resource/:id
pub async fn get_resource(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Path((resource, id)): Path<(String, String)>,
) -> Result<Json<Value>> {
    validate_segment(&resource)?;
    validate_segment(&id)?;

    let session = state.session(&tenant);
    let body = state
        .upstream
        .get(&session, &format!("/{}/{}", resource, id), &[])
        .await?;
    Ok(Json(body))
}

/// Reject path segments that could escape the upstream resource namespace
fn validate_segment(segment: &str) -> Result<()> {
    let valid = !segment.is_empty()
        && segment.len() <= 128
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(GatewayError::Validation(format!(
            "invalid path segment: {:?}",
            segment
        )))
    }
}

/// Query parameters that are not gateway controls become list filters
fn filters_from(params: &HashMap<String, String>) -> Option<Map<String, Value>> {
    let filters: Map<String, Value> = params
        .iter()
        .filter(|(key, _)| !RESERVED_PARAMS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), Value::String(value.clone())))
        .collect();
    if filters.is_empty() {
        None
    } else {
        Some(filters)
    }
}

fn forwarded_query(params: &HashMap<String, String>) -> Vec<(String, String)> {
    params
        .iter()
        .filter(|(key, _)| key.as_str() != "full")
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_segment() {
        assert!(validate_segment("bookings").is_ok());
        assert!(validate_segment("bk_123-x").is_ok());
        assert!(validate_segment("").is_err());
        assert!(validate_segment("..").is_err());
        assert!(validate_segment("a/b").is_err());
    }

    #[test]
    fn test_filters_skip_control_params() {
        let params: HashMap<String, String> = [
            ("cursor", "abc"),
            ("page_size", "5"),
            ("order_by", "check_in"),
            ("full", "true"),
            ("status", "confirmed"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let filters = filters_from(&params).unwrap();
        assert_eq!(filters.len(), 1);
        assert_eq!(filters["status"], "confirmed");

        let only_controls: HashMap<String, String> =
            [("page_size".to_string(), "5".to_string())].into_iter().collect();
        assert!(filters_from(&only_controls).is_none());
    }
}
