//! Request and response middleware

pub mod auth;
pub mod gateway;
pub mod rate_limiter;

pub use auth::{auth_middleware, TenantContext};
pub use gateway::{context_gateway_middleware, ContextGateway, Decision, PassReason, Shaped};
pub use rate_limiter::{Admission, RateLimitConfig, RateLimitKeys, RateLimiter};
