//! Tenant credential lookup
//!
//! Clients present a raw API key; only its SHA-256 hash is ever stored or
//! compared.

use async_trait::async_trait;
use dashmap::DashMap;
use secrecy::SecretString;
use serde::Deserialize;
use sha2::{Digest, Sha256};

/// Upstream credentials for one tenant account
#[derive(Clone)]
pub struct TenantCredentials {
    pub account_id: String,
    pub secret: SecretString,
}

impl std::fmt::Debug for TenantCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantCredentials")
            .field("account_id", &self.account_id)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Result of a successful key lookup
#[derive(Debug, Clone)]
pub struct TenantRecord {
    pub tenant_id: String,
    pub credentials: TenantCredentials,
}

/// Source of tenant records, keyed by hashed API key
#[async_trait]
pub trait CredentialDirectory: Send + Sync {
    async fn lookup_by_hashed_key(&self, key_hash: &str) -> Option<TenantRecord>;
}

/// Hex-encoded SHA-256 of a raw API key
pub fn hash_api_key(raw_key: &str) -> String {
    hex::encode(Sha256::digest(raw_key.as_bytes()))
}

/// Seed entry for the in-memory directory
#[derive(Clone, Deserialize)]
pub struct TenantSeed {
    pub api_key_hash: String,
    pub tenant_id: String,
    pub account_id: String,
    pub secret: SecretString,
}

impl std::fmt::Debug for TenantSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantSeed")
            .field("tenant_id", &self.tenant_id)
            .field("account_id", &self.account_id)
            .finish_non_exhaustive()
    }
}

/// Directory held in process memory
#[derive(Default)]
pub struct InMemoryDirectory {
    records: DashMap<String, TenantRecord>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seeds(seeds: &[TenantSeed]) -> Self {
        let directory = Self::new();
        for seed in seeds {
            directory.insert(
                seed.api_key_hash.to_ascii_lowercase(),
                TenantRecord {
                    tenant_id: seed.tenant_id.clone(),
                    credentials: TenantCredentials {
                        account_id: seed.account_id.clone(),
                        secret: seed.secret.clone(),
                    },
                },
            );
        }
        directory
    }

    pub fn insert(&self, key_hash: String, record: TenantRecord) {
        self.records.insert(key_hash, record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl CredentialDirectory for InMemoryDirectory {
    async fn lookup_by_hashed_key(&self, key_hash: &str) -> Option<TenantRecord> {
        self.records.get(key_hash).map(|r| r.value().clone())
    }
}
