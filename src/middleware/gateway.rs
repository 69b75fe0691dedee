//! Response interception: keep JSON bodies inside the route's token budget
//!
//! Every response passes through [`context_gateway_middleware`]. Errors,
//! non-JSON bodies, pages and existing summaries are returned byte for
//! byte. Everything else is priced with the token estimator and, when it
//! exceeds the resolved threshold, replaced by a summary envelope.

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::context::models::ReductionMetrics;
use crate::context::projector::type_tag_for_path;
use crate::context::summarizer::SummarizationService;
use crate::error::GatewayError;
use crate::metrics::Metrics;
use crate::policy::PolicyStore;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const SUMMARIZED_HEADER: &str = "x-context-summarized";
pub const ESTIMATED_TOKENS_HEADER: &str = "x-estimated-tokens";
pub const FULL_RESPONSE_HEADER: &str = "x-full-response";

/// Keys that mark a body as an already paginated page
const ITEMS_KEYS: &[&str] = &["items", "data", "results"];
/// Keys that mark a body as an already built summary
const SUMMARY_KEYS: &[&str] = &["summary", "summaries"];
const META_KEY: &str = "meta";

/// Default ceiling on buffered response bodies
pub const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Why a response was left untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassReason {
    ErrorStatus,
    NotJson,
    AlreadyPaginated,
    AlreadySummarized,
    UnderBudget,
    SummarizationDisabled,
    FullViewRequested,
}

impl PassReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassReason::ErrorStatus => "error_status",
            PassReason::NotJson => "not_json",
            PassReason::AlreadyPaginated => "already_paginated",
            PassReason::AlreadySummarized => "already_summarized",
            PassReason::UnderBudget => "under_budget",
            PassReason::SummarizationDisabled => "summarization_disabled",
            PassReason::FullViewRequested => "full_view",
        }
    }
}

/// Outcome of inspecting a parsed JSON body
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    PassThrough {
        reason: PassReason,
        estimated_tokens: Option<usize>,
    },
    Summarize {
        estimated_tokens: usize,
    },
}

/// Final shape of a response body
#[derive(Debug)]
pub enum Shaped {
    /// Send the original bytes
    PassThrough {
        reason: PassReason,
        estimated_tokens: Option<usize>,
    },
    Summarized {
        body: Vec<u8>,
        estimated_tokens: usize,
        reduction: ReductionMetrics,
    },
}

/// True for `{items|data|results: [...], meta: {...}}`
pub fn is_page(value: &Value) -> bool {
    match value.as_object() {
        Some(object) => {
            object.contains_key(META_KEY) && ITEMS_KEYS.iter().any(|k| object.contains_key(*k))
        }
        None => false,
    }
}

/// True for `{summary: {...}, meta: {...}}`
pub fn is_summary_envelope(value: &Value) -> bool {
    match value.as_object() {
        Some(object) => {
            object.contains_key(META_KEY) && SUMMARY_KEYS.iter().any(|k| object.contains_key(*k))
        }
        None => false,
    }
}

/// Orchestrates budget checks and summarization for outgoing responses
pub struct ContextGateway {
    policies: Arc<PolicyStore>,
    summarizer: Arc<SummarizationService>,
    metrics: Option<Arc<Metrics>>,
    max_body_bytes: usize,
}

impl ContextGateway {
    pub fn new(policies: Arc<PolicyStore>, summarizer: Arc<SummarizationService>) -> Self {
        Self {
            policies,
            summarizer,
            metrics: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    pub fn policies(&self) -> &Arc<PolicyStore> {
        &self.policies
    }

    /// Decide what to do with a successful JSON body.
    ///
    /// The hard cap is absolute: a body above it is summarized even when
    /// summarization is disabled for the route or the caller asked for the
    /// full view.
    pub fn decide(&self, path: &str, full_view: bool, body: &Value) -> Decision {
        if is_summary_envelope(body) {
            return Decision::PassThrough {
                reason: PassReason::AlreadySummarized,
                estimated_tokens: None,
            };
        }
        if is_page(body) {
            return Decision::PassThrough {
                reason: PassReason::AlreadyPaginated,
                estimated_tokens: None,
            };
        }

        let policy = self.policies.resolve(path);
        let (over_threshold, estimated_tokens) =
            self.summarizer.should_summarize(body, policy.threshold_tokens);
        if !over_threshold {
            return Decision::PassThrough {
                reason: PassReason::UnderBudget,
                estimated_tokens: Some(estimated_tokens),
            };
        }

        let over_cap = estimated_tokens > policy.hard_cap_tokens;
        if !over_cap {
            let reason = if full_view {
                Some(PassReason::FullViewRequested)
            } else if !policy.summarization_enabled {
                Some(PassReason::SummarizationDisabled)
            } else {
                None
            };
            if let Some(reason) = reason {
                return Decision::PassThrough {
                    reason,
                    estimated_tokens: Some(estimated_tokens),
                };
            }
        }

        Decision::Summarize { estimated_tokens }
    }

    /// Inspect a buffered response body and produce its final shape
    pub fn shape(
        &self,
        path: &str,
        full_view: bool,
        status: StatusCode,
        is_json: bool,
        bytes: &[u8],
    ) -> Shaped {
        if !status.is_success() {
            return Shaped::PassThrough {
                reason: PassReason::ErrorStatus,
                estimated_tokens: None,
            };
        }
        if !is_json {
            return Shaped::PassThrough {
                reason: PassReason::NotJson,
                estimated_tokens: None,
            };
        }
        let body: Value = match serde_json::from_slice(bytes) {
            Ok(body) => body,
            Err(e) => {
                debug!(path, "response claims JSON but does not parse: {}", e);
                return Shaped::PassThrough {
                    reason: PassReason::NotJson,
                    estimated_tokens: None,
                };
            }
        };

        match self.decide(path, full_view, &body) {
            Decision::PassThrough {
                reason,
                estimated_tokens,
            } => Shaped::PassThrough {
                reason,
                estimated_tokens,
            },
            Decision::Summarize { estimated_tokens } => {
                let type_tag = type_tag_for_path(path);
                let summary = self.summarizer.summarize_value(&body, type_tag, path, None);
                let reduction = self.summarizer.reduction_metrics(&body, &summary);
                match serde_json::to_vec(&summary) {
                    Ok(body) => {
                        info!(
                            endpoint = path,
                            type_tag,
                            estimated_tokens,
                            token_reduction = reduction.token_reduction_ratio,
                            "response summarized"
                        );
                        Shaped::Summarized {
                            body,
                            estimated_tokens,
                            reduction,
                        }
                    }
                    Err(e) => {
                        error!(endpoint = path, "failed to serialize summary: {}", e);
                        Shaped::PassThrough {
                            reason: PassReason::NotJson,
                            estimated_tokens: Some(estimated_tokens),
                        }
                    }
                }
            }
        }
    }

    fn record(&self, shaped: &Shaped) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        match shaped {
            Shaped::PassThrough {
                reason,
                estimated_tokens,
            } => metrics.record_gateway_outcome(reason.as_str(), *estimated_tokens),
            Shaped::Summarized {
                estimated_tokens,
                reduction,
                ..
            } => {
                metrics.record_gateway_outcome("summarized", Some(*estimated_tokens));
                metrics.record_reduction(
                    reduction.field_reduction_ratio,
                    reduction.token_reduction_ratio,
                );
            }
        }
    }
}

/// True when the caller asked for the unabridged object
pub fn wants_full_view(headers: &HeaderMap, query: Option<&str>) -> bool {
    let header = headers
        .get(FULL_RESPONSE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(is_truthy)
        .unwrap_or(false);

    let param = query
        .map(|q| {
            q.split('&')
                .filter_map(|pair| pair.split_once('='))
                .any(|(key, value)| key == "full" && is_truthy(value))
        })
        .unwrap_or(false);

    header || param
}

fn is_truthy(value: &str) -> bool {
    let value = value.trim().to_ascii_lowercase();
    value == "true" || value == "1" || value == "yes"
}

fn is_json_content(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            let v = v.to_ascii_lowercase();
            v.starts_with("application/json") || v.contains("+json")
        })
        .unwrap_or(false)
}

/// Axum middleware wrapping every handler's response
pub async fn context_gateway_middleware(
    State(gateway): State<Arc<ContextGateway>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let full_view = wants_full_view(request.headers(), request.uri().query());
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let response = next.run(request).await;
    let (mut parts, body) = response.into_parts();
    set_header(&mut parts.headers, REQUEST_ID_HEADER, &request_id);

    // Nothing to inspect: skip buffering entirely
    if !parts.status.is_success() || !is_json_content(&parts.headers) {
        let shaped = gateway.shape(
            &path,
            full_view,
            parts.status,
            is_json_content(&parts.headers),
            &[],
        );
        gateway.record(&shaped);
        return Response::from_parts(parts, body);
    }

    let bytes: Bytes = match to_bytes(body, gateway.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(endpoint = %path, request_id = %request_id, "failed to buffer response body: {}", e);
            return GatewayError::Internal("response body could not be inspected".to_string())
                .into_response();
        }
    };

    let shaped = gateway.shape(&path, full_view, parts.status, true, &bytes);
    gateway.record(&shaped);

    match shaped {
        Shaped::PassThrough {
            estimated_tokens, ..
        } => {
            if let Some(tokens) = estimated_tokens {
                set_header(&mut parts.headers, ESTIMATED_TOKENS_HEADER, &tokens.to_string());
            }
            Response::from_parts(parts, Body::from(bytes))
        }
        Shaped::Summarized {
            body,
            estimated_tokens,
            ..
        } => {
            parts.headers.remove(header::CONTENT_LENGTH);
            set_header(&mut parts.headers, SUMMARIZED_HEADER, "true");
            set_header(
                &mut parts.headers,
                ESTIMATED_TOKENS_HEADER,
                &estimated_tokens.to_string(),
            );
            Response::from_parts(parts, Body::from(body))
        }
    }
}

fn set_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}
