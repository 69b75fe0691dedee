//! Context-budget protecting API gateway
//!
//! Sits in front of a rate-limited property-management API and keeps every
//! response inside an AI agent's context budget:
//!
//! - [`middleware::rate_limiter`] admits upstream calls through dual-key
//!   token buckets and a concurrency bound.
//! - [`pagination`] turns offset queries into pages behind signed cursors.
//! - [`context`] estimates token cost and projects objects onto their
//!   essential fields.
//! - [`policy`] holds the per-endpoint budget, hot reloaded from YAML.
//! - [`middleware::gateway`] ties these together on every response.

pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod pagination;
pub mod policy;
pub mod upstream;

pub use error::{GatewayError, Result};

/// Commonly used types
pub mod prelude {
    pub use crate::config::GatewayConfig;
    pub use crate::context::{
        BudgetPolicy, CharRatioEstimator, EffectivePolicy, PolicyOverride, SummarizationService,
        SummaryEnvelope, TokenEstimator,
    };
    pub use crate::error::{GatewayError, Result};
    pub use crate::metrics::Metrics;
    pub use crate::middleware::{ContextGateway, RateLimitConfig, RateLimitKeys, RateLimiter};
    pub use crate::pagination::{CursorCodec, CursorError, Page, PaginationService};
    pub use crate::policy::{PolicyStore, PolicyWatcher};
}
