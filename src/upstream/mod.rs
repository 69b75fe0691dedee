//! Collaborators on the upstream side of the gateway

pub mod auth;
pub mod client;
pub mod token;

pub use auth::{hash_api_key, CredentialDirectory, InMemoryDirectory, TenantCredentials, TenantRecord, TenantSeed};
pub use client::{UpstreamClient, UpstreamConfig, UpstreamSession};
pub use token::{AccessToken, OAuthTokenSupplier, TokenRegistry, TokenSupplier};
