//! Router assembly

use axum::{routing::get, Router};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use super::handlers::{self, AppState};
use crate::middleware::auth::auth_middleware;
use crate::middleware::gateway::{context_gateway_middleware, ContextGateway};
use crate::upstream::auth::CredentialDirectory;

/// Build the gateway router.
///
/// `/api/v1` routes require a tenant API key. Every response, including
/// authentication failures, passes through the context gateway.
pub fn build_router(
    state: AppState,
    gateway: Arc<ContextGateway>,
    directory: Arc<dyn CredentialDirectory>,
    max_body_bytes: usize,
) -> Router {
    let api_routes = Router::new()
        .route("/api/v1/:resource", get(handlers::list_resource))
        .route("/api/v1/:resource/:id", get(handlers::get_resource))
        .layer(axum::middleware::from_fn_with_state(directory, auth_middleware));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .merge(api_routes)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn_with_state(
                    gateway,
                    context_gateway_middleware,
                )),
        )
        .with_state(state)
}
