//! Process configuration
//!
//! Loaded from an optional TOML/YAML file and then from environment
//! variables prefixed with `GATEWAY__`, using `__` between nested keys
//! (`GATEWAY__SERVER__PORT=9090`). Every field has a default, so an empty
//! environment yields a runnable local setup.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::error::{GatewayError, Result};
use crate::middleware::gateway::DEFAULT_MAX_BODY_BYTES;
use crate::middleware::rate_limiter::RateLimitConfig;
use crate::pagination::cursor::CursorCodec;
use crate::policy::WatchSettings;
use crate::upstream::auth::TenantSeed;
use crate::upstream::client::UpstreamConfig;

pub const ENV_PREFIX: &str = "GATEWAY";

/// Top-level gateway configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub cursor: CursorConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Seed records for the in-memory credential directory
    #[serde(default)]
    pub tenants: Vec<TenantSeed>,
}

impl GatewayConfig {
    /// Load from `path` (if given) and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: GatewayConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| GatewayError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.rate_limit.validate()?;
        if self.cursor.ttl_secs == 0 {
            return Err(GatewayError::Configuration(
                "cursor.ttl_secs must be positive".to_string(),
            ));
        }
        if self.server.max_body_bytes == 0 {
            return Err(GatewayError::Configuration(
                "server.max_body_bytes must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Largest request or response body the gateway buffers
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_max_body_bytes() -> usize { DEFAULT_MAX_BODY_BYTES }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Pagination cursor signing
#[derive(Debug, Clone, Deserialize)]
pub struct CursorConfig {
    /// HMAC secret; a random one is generated when unset
    #[serde(default)]
    pub secret: Option<SecretString>,

    #[serde(default = "default_cursor_ttl")]
    pub ttl_secs: u64,
}

fn default_cursor_ttl() -> u64 { 900 }

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            secret: None,
            ttl_secs: default_cursor_ttl(),
        }
    }
}

impl CursorConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Codec for the configured secret
    pub fn build_codec(&self) -> CursorCodec {
        match &self.secret {
            Some(secret) => CursorCodec::new(secret.clone()),
            None => {
                warn!("No cursor secret configured; using a random one, cursors will not survive restarts");
                CursorCodec::with_random_secret()
            }
        }
    }
}

/// Budget policy file and reload timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// YAML policy file; built-in defaults apply when unset
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_poll_interval_ms() -> u64 { 250 }
fn default_debounce_ms() -> u64 { 1000 }

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            path: None,
            poll_interval_ms: default_poll_interval_ms(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl PolicyConfig {
    pub fn watch_settings(&self) -> WatchSettings {
        WatchSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            debounce: Duration::from_millis(self.debounce_ms),
        }
    }
}

/// Log output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String { "info".to_string() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
