//! Upstream bearer tokens
//!
//! [`OAuthTokenSupplier`] performs the client-credentials exchange for one
//! tenant account and caches the result until shortly before it expires.
//! [`TokenRegistry`] hands out one supplier per tenant.

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::auth::TenantCredentials;
use crate::error::{GatewayError, Result};

/// Tokens are refreshed this long before they expire
pub const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// A bearer token and its expiry
#[derive(Clone)]
pub struct AccessToken {
    value: SecretString,
    expires_at: Instant,
}

impl AccessToken {
    pub fn new(value: impl Into<String>, expires_in: Duration) -> Self {
        Self {
            value: SecretString::new(value.into()),
            expires_at: Instant::now() + expires_in,
        }
    }

    pub fn secret(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Still usable for at least `margin`
    pub fn is_fresh(&self, margin: Duration) -> bool {
        Instant::now() + margin < self.expires_at
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Supplies bearer tokens for upstream calls
#[async_trait]
pub trait TokenSupplier: Send + Sync {
    async fn get_token(&self) -> Result<AccessToken>;

    /// Drop any cached token, e.g. after the upstream answered 401
    async fn invalidate(&self);
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// Client-credentials token exchange with caching
pub struct OAuthTokenSupplier {
    http: Client,
    token_url: String,
    credentials: TenantCredentials,
    cached: Mutex<Option<AccessToken>>,
}

impl OAuthTokenSupplier {
    pub fn new(http: Client, token_url: impl Into<String>, credentials: TenantCredentials) -> Self {
        Self {
            http,
            token_url: token_url.into(),
            credentials,
            cached: Mutex::new(None),
        }
    }

    /// Exchange the account credentials for a fresh token
    pub async fn issue_token(&self) -> Result<AccessToken> {
        debug!(account_id = %self.credentials.account_id, "requesting upstream token");

        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.credentials.account_id.as_str()),
                ("client_secret", self.credentials.secret.expose_secret().as_str()),
            ])
            .send()
            .await
            .map_err(|e| GatewayError::TokenExchange(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(
                account_id = %self.credentials.account_id,
                status = status.as_u16(),
                "token exchange rejected"
            );
            return Err(GatewayError::TokenExchange(format!(
                "token endpoint returned {}",
                status
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::TokenExchange(format!("invalid token response: {}", e)))?;

        info!(
            account_id = %self.credentials.account_id,
            expires_in = body.expires_in,
            "upstream token issued"
        );
        Ok(AccessToken::new(
            body.access_token,
            Duration::from_secs(body.expires_in),
        ))
    }
}

#[async_trait]
impl TokenSupplier for OAuthTokenSupplier {
    async fn get_token(&self) -> Result<AccessToken> {
        // Held across the exchange so concurrent callers share one refresh
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.is_fresh(REFRESH_MARGIN) {
                return Ok(token.clone());
            }
        }

        let token = self.issue_token().await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    async fn invalidate(&self) {
        self.cached.lock().await.take();
    }
}

/// One token supplier per tenant
pub struct TokenRegistry {
    http: Client,
    token_url: String,
    suppliers: DashMap<String, Arc<dyn TokenSupplier>>,
}

impl TokenRegistry {
    pub fn new(http: Client, token_url: impl Into<String>) -> Self {
        Self {
            http,
            token_url: token_url.into(),
            suppliers: DashMap::new(),
        }
    }

    /// Supplier for a tenant, created on first use
    pub fn supplier_for(
        &self,
        tenant_id: &str,
        credentials: &TenantCredentials,
    ) -> Arc<dyn TokenSupplier> {
        if let Some(supplier) = self.suppliers.get(tenant_id) {
            return supplier.clone();
        }
        self.suppliers
            .entry(tenant_id.to_string())
            .or_insert_with(|| {
                Arc::new(OAuthTokenSupplier::new(
                    self.http.clone(),
                    self.token_url.clone(),
                    credentials.clone(),
                ))
            })
            .clone()
    }

    /// Register a supplier explicitly
    pub fn insert(&self, tenant_id: impl Into<String>, supplier: Arc<dyn TokenSupplier>) {
        self.suppliers.insert(tenant_id.into(), supplier);
    }
}
