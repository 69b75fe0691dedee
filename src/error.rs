//! Crate-wide error type and HTTP mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::api::models::{error_codes, ApiError};
use crate::context::token_budget::BudgetError;
use crate::pagination::cursor::CursorError;
use crate::policy::PolicyLoadError;

/// Result alias used across the gateway
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Errors surfaced to the route layer
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Cursor(#[from] CursorError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Budget policy invalid: {0}")]
    Budget(#[from] BudgetError),

    #[error("Policy load failed: {0}")]
    Policy(#[from] PolicyLoadError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Upstream request failed: {0}")]
    Network(String),

    #[error("Token exchange failed: {0}")]
    TokenExchange(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// HTTP status the route layer answers with
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Cursor(_) | GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Upstream { status, .. } if *status == 404 => StatusCode::NOT_FOUND,
            GatewayError::Upstream { .. }
            | GatewayError::Network(_)
            | GatewayError::TokenExchange(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Budget(_)
            | GatewayError::Policy(_)
            | GatewayError::Configuration(_)
            | GatewayError::Serialization(_)
            | GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for the response body
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Cursor(e) => e.code(),
            GatewayError::Validation(_) => error_codes::VALIDATION_ERROR,
            GatewayError::Unauthorized(_) => error_codes::UNAUTHORIZED,
            GatewayError::Upstream { status, .. } if *status == 404 => error_codes::NOT_FOUND,
            GatewayError::Upstream { .. } | GatewayError::Network(_) => error_codes::UPSTREAM_ERROR,
            GatewayError::TokenExchange(_) => error_codes::UPSTREAM_AUTH_ERROR,
            _ => error_codes::INTERNAL_ERROR,
        }
    }

    fn client_message(&self) -> String {
        match self {
            GatewayError::Cursor(e) => e.client_message().to_string(),
            other => other.to_string(),
        }
    }
}

impl From<std::convert::Infallible> for GatewayError {
    fn from(never: std::convert::Infallible) -> Self {
        match never {}
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        (status, Json(ApiError::new(self.code(), self.client_message()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_errors_map_to_bad_request() {
        let err = GatewayError::from(CursorError::Tampered);
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), error_codes::CURSOR_TAMPERED);

        let err = GatewayError::from(CursorError::Expired { age_secs: 10.0, ttl_secs: 5 });
        assert_eq!(err.code(), error_codes::CURSOR_EXPIRED);
        assert!(err.client_message().contains("from the start"));
    }

    #[test]
    fn test_upstream_not_found_passes_through() {
        let err = GatewayError::Upstream { status: 404, body: "missing".to_string() };
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let err = GatewayError::Upstream { status: 503, body: String::new() };
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }
}
