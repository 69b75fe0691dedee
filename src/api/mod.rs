//! HTTP surface of the gateway

pub mod handlers;
pub mod models;
pub mod routes;

pub use handlers::AppState;
pub use models::{error_codes, ApiError, HealthResponse};
pub use routes::build_router;
