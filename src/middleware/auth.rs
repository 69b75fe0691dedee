//! Tenant authentication for gateway routes
//!
//! Accepts the API key from `X-API-Key` or `Authorization: Bearer <key>`,
//! hashes it and looks the tenant up in the credential directory. The
//! resolved [`TenantContext`] is stored as a request extension.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::debug;

use crate::error::GatewayError;
use crate::upstream::auth::{hash_api_key, CredentialDirectory, TenantCredentials};

pub const API_KEY_HEADER: &str = "x-api-key";

/// Authenticated tenant attached to each request
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant_id: String,
    pub credentials: TenantCredentials,
}

/// Pull the raw API key out of the request headers
pub fn extract_api_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(key) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        let key = key.trim();
        if !key.is_empty() {
            return Some(key);
        }
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|k| !k.is_empty())
}

/// Authentication middleware function
pub async fn auth_middleware(
    State(directory): State<Arc<dyn CredentialDirectory>>,
    mut request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let key_hash = extract_api_key(request.headers())
        .map(hash_api_key)
        .ok_or_else(|| GatewayError::Unauthorized("missing API key".to_string()))?;

    let record = directory
        .lookup_by_hashed_key(&key_hash)
        .await
        .ok_or_else(|| GatewayError::Unauthorized("unknown API key".to_string()))?;

    debug!(tenant_id = %record.tenant_id, "request authenticated");
    request.extensions_mut().insert(TenantContext {
        tenant_id: record.tenant_id,
        credentials: record.credentials,
    });

    Ok(next.run(request).await)
}
