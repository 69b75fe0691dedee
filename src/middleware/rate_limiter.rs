//! Admission control for upstream calls
//!
//! Two keyed token-bucket families (per identity, per account) plus one
//! shared concurrency semaphore. Callers never get rejected: when a bucket
//! is empty the caller sleeps until it refills.
//!
//! Acquisition order is fixed: concurrency slot, identity bucket, account
//! bucket. Each bucket sits behind a `tokio::sync::Mutex`, whose waiters are
//! queued in arrival order, so contended callers are admitted roughly FIFO.
//! A waiter sleeps while holding its bucket's lock; dropping the future
//! releases the lock without consuming a token.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::debug;

use crate::error::{GatewayError, Result};
use crate::metrics::Metrics;

/// Rate limiter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_identity_capacity")]
    pub identity_capacity: u32,

    /// Tokens per second
    #[serde(default = "default_identity_refill")]
    pub identity_refill_per_sec: f64,

    #[serde(default = "default_account_capacity")]
    pub account_capacity: u32,

    #[serde(default = "default_account_refill")]
    pub account_refill_per_sec: f64,

    /// Upper bound on admitted calls in flight
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_identity_capacity() -> u32 { 20 }
fn default_identity_refill() -> f64 { 10.0 }
fn default_account_capacity() -> u32 { 60 }
fn default_account_refill() -> f64 { 30.0 }
fn default_max_concurrent() -> usize { 16 }

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            identity_capacity: default_identity_capacity(),
            identity_refill_per_sec: default_identity_refill(),
            account_capacity: default_account_capacity(),
            account_refill_per_sec: default_account_refill(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> Result<()> {
        if self.identity_capacity == 0 || self.account_capacity == 0 {
            return Err(GatewayError::Configuration(
                "bucket capacity must be at least 1".to_string(),
            ));
        }
        let refills = [self.identity_refill_per_sec, self.account_refill_per_sec];
        if refills.iter().any(|r| !r.is_finite() || *r <= 0.0) {
            return Err(GatewayError::Configuration(
                "refill rate must be positive".to_string(),
            ));
        }
        if self.max_concurrent == 0 {
            return Err(GatewayError::Configuration(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Classic continuously refilling token bucket
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A full bucket
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity: capacity as f64,
            refill_per_sec,
            tokens: capacity as f64,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Take one token, or report how long until one is available
    pub fn try_take(&mut self, now: Instant) -> std::result::Result<(), Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(deficit / self.refill_per_sec))
        }
    }

    pub fn available(&mut self, now: Instant) -> f64 {
        self.refill(now);
        self.tokens
    }
}

/// One family of buckets sharing capacity and refill rate
struct KeyedBuckets {
    capacity: u32,
    refill_per_sec: f64,
    buckets: DashMap<String, Arc<Mutex<TokenBucket>>>,
}

impl KeyedBuckets {
    fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            refill_per_sec,
            buckets: DashMap::new(),
        }
    }

    fn bucket(&self, key: &str) -> Arc<Mutex<TokenBucket>> {
        if let Some(bucket) = self.buckets.get(key) {
            return bucket.clone();
        }
        self.buckets
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::new(self.capacity, self.refill_per_sec))))
            .clone()
    }

    async fn take(&self, key: &str) {
        let bucket = self.bucket(key);
        let mut bucket = bucket.lock().await;
        loop {
            match bucket.try_take(Instant::now()) {
                Ok(()) => return,
                Err(wait) => tokio::time::sleep(wait).await,
            }
        }
    }

    async fn available(&self, key: &str) -> Option<f64> {
        let bucket = self.buckets.get(key)?.clone();
        let mut bucket = bucket.lock().await;
        Some(bucket.available(Instant::now()))
    }
}

/// Bucket keys for one upstream call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitKeys {
    /// Requesting identity, e.g. API key holder or client address
    pub identity: String,
    /// Tenant account whose upstream quota the call spends
    pub account: String,
}

impl RateLimitKeys {
    pub fn new(identity: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            account: account.into(),
        }
    }
}

/// Proof of admission; the concurrency slot is released when this drops
pub struct Admission {
    _permit: OwnedSemaphorePermit,
    waited: Duration,
    metrics: Option<Arc<Metrics>>,
}

impl Admission {
    /// Time spent suspended before admission
    pub fn waited(&self) -> Duration {
        self.waited
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        if let Some(metrics) = &self.metrics {
            metrics.in_flight.dec();
        }
    }
}

/// Dual-key token bucket limiter with bounded concurrency
pub struct RateLimiter {
    identity: KeyedBuckets,
    account: KeyedBuckets,
    slots: Arc<Semaphore>,
    max_concurrent: usize,
    metrics: Option<Arc<Metrics>>,
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new(config: &RateLimitConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            identity: KeyedBuckets::new(config.identity_capacity, config.identity_refill_per_sec),
            account: KeyedBuckets::new(config.account_capacity, config.account_refill_per_sec),
            slots: Arc::new(Semaphore::new(config.max_concurrent)),
            max_concurrent: config.max_concurrent,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Wait for admission.
    ///
    /// Never fails; suspends until a concurrency slot and a token from both
    /// buckets are available.
    pub async fn acquire(&self, keys: &RateLimitKeys) -> Admission {
        let started = Instant::now();

        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .expect("rate limiter semaphore is never closed");
        self.identity.take(&keys.identity).await;
        self.account.take(&keys.account).await;

        let waited = started.elapsed();
        if waited > Duration::ZERO {
            debug!(
                identity = %keys.identity,
                account = %keys.account,
                waited_ms = waited.as_millis() as u64,
                "admission delayed"
            );
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_rate_limit_wait(waited);
            metrics.in_flight.inc();
        }

        Admission {
            _permit: permit,
            waited,
            metrics: self.metrics.clone(),
        }
    }

    /// Run `work` inside an admission, released on every exit path
    pub async fn scoped<F, T>(&self, keys: &RateLimitKeys, work: F) -> T
    where
        F: Future<Output = T>,
    {
        let _admission = self.acquire(keys).await;
        work.await
    }

    /// Admitted calls currently in flight
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.slots.available_permits()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Tokens left in an identity bucket, `None` if the key was never seen
    pub async fn identity_tokens(&self, key: &str) -> Option<f64> {
        self.identity.available(key).await
    }

    /// Tokens left in an account bucket, `None` if the key was never seen
    pub async fn account_tokens(&self, key: &str) -> Option<f64> {
        self.account.available(key).await
    }
}
