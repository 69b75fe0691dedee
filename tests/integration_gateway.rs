//! End-to-end tests for the gateway router
//!
//! The upstream API and its token endpoint are mocked with mockito; the
//! budget policy lives in a temporary YAML file.

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use mockito::{Matcher, Server, ServerGuard};
use secrecy::SecretString;
use serde_json::{json, Value};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tower::ServiceExt;

use context_gateway::{
    api::{build_router, AppState},
    context::SummarizationService,
    metrics::Metrics,
    middleware::{
        gateway::{ESTIMATED_TOKENS_HEADER, SUMMARIZED_HEADER},
        ContextGateway, RateLimitConfig, RateLimiter,
    },
    pagination::{CursorCodec, PaginationService},
    policy::PolicyStore,
    upstream::{
        hash_api_key, CredentialDirectory, InMemoryDirectory, TenantCredentials, TenantRecord,
        TokenRegistry, UpstreamClient, UpstreamConfig,
    },
};

const API_KEY: &str = "tenant-key";

const POLICY: &str = r#"
global:
  output_token_threshold: 100
  hard_output_token_cap: 5000
  default_page_size: 2
  max_page_size: 10
endpoints:
  "/api/v1/invoices*":
    enable_summarization: false
"#;

struct Harness {
    app: Router,
    policies: Arc<PolicyStore>,
    policy_file: NamedTempFile,
}

async fn harness(server: &mut ServerGuard) -> Harness {
    server
        .mock("POST", "/oauth/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"upstream-token","expires_in":3600}"#)
        .create_async()
        .await;

    let mut policy_file = NamedTempFile::new().unwrap();
    write!(policy_file, "{}", POLICY).unwrap();

    let metrics = Arc::new(Metrics::new().unwrap());
    let policies = Arc::new(PolicyStore::from_file(policy_file.path()));
    let limiter = Arc::new(
        RateLimiter::new(&RateLimitConfig::default())
            .unwrap()
            .with_metrics(metrics.clone()),
    );
    let upstream_config = UpstreamConfig {
        base_url: server.url(),
        token_url: format!("{}/oauth/token", server.url()),
        ..Default::default()
    };
    let upstream = UpstreamClient::new(&upstream_config, limiter.clone())
        .unwrap()
        .with_metrics(metrics.clone());
    let tokens = Arc::new(TokenRegistry::new(
        upstream.http().clone(),
        upstream_config.token_url.clone(),
    ));

    let codec = Arc::new(CursorCodec::new(SecretString::new("test-secret".to_string())));
    let pagination = Arc::new(PaginationService::new(
        codec,
        policies.clone(),
        Duration::from_secs(300),
    ));
    let gateway = Arc::new(
        ContextGateway::new(policies.clone(), Arc::new(SummarizationService::default()))
            .with_metrics(metrics.clone()),
    );

    let directory = InMemoryDirectory::new();
    directory.insert(
        hash_api_key(API_KEY),
        TenantRecord {
            tenant_id: "tenant-1".to_string(),
            credentials: TenantCredentials {
                account_id: "acct-1".to_string(),
                secret: SecretString::new("client-secret".to_string()),
            },
        },
    );
    let directory: Arc<dyn CredentialDirectory> = Arc::new(directory);

    let state = AppState {
        pagination,
        upstream: Arc::new(upstream),
        tokens,
        policies: policies.clone(),
        limiter,
        metrics,
    };

    Harness {
        app: build_router(state, gateway, directory, 1024 * 1024),
        policies,
        policy_file,
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-api-key", API_KEY)
        .body(Body::empty())
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, headers, body)
}

fn large_booking() -> Value {
    json!({
        "id": 42,
        "status": "confirmed",
        "check_in": "2026-03-01",
        "check_out": "2026-03-05",
        "guest_name": "Sam Doe",
        "internal_notes": "x".repeat(2000),
        "channel": {"name": "direct", "fees": [1, 2, 3]},
    })
}

#[tokio::test]
async fn test_large_object_is_summarized() {
    let mut server = Server::new_async().await;
    let h = harness(&mut server).await;
    server
        .mock("GET", "/bookings/42")
        .match_header("authorization", "Bearer upstream-token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(large_booking().to_string())
        .create_async()
        .await;

    let (status, headers, body) = send(&h.app, get("/api/v1/bookings/42")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[SUMMARIZED_HEADER], "true");
    assert_eq!(
        body["summary"],
        json!({
            "id": 42,
            "status": "confirmed",
            "check_in": "2026-03-01",
            "check_out": "2026-03-05",
            "guest_name": "Sam Doe",
        })
    );
    assert_eq!(body["meta"]["kind"], "preview");
    assert_eq!(body["meta"]["details_fetch"]["endpoint"], "/api/v1/bookings/42");
    assert_eq!(body["meta"]["details_fetch"]["parameters"]["full"], "true");
}

#[tokio::test]
async fn test_small_object_passes_through() {
    let mut server = Server::new_async().await;
    let h = harness(&mut server).await;
    let small = json!({"id": 7, "name": "Loft", "status": "active"});
    server
        .mock("GET", "/properties/7")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(small.to_string())
        .create_async()
        .await;

    let (status, headers, body) = send(&h.app, get("/api/v1/properties/7")).await;

    assert_eq!(status, StatusCode::OK);
    assert!(!headers.contains_key(SUMMARIZED_HEADER));
    assert!(headers.contains_key(ESTIMATED_TOKENS_HEADER));
    assert_eq!(body, small);
}

#[tokio::test]
async fn test_full_view_and_disabled_routes() {
    let mut server = Server::new_async().await;
    let h = harness(&mut server).await;
    server
        .mock("GET", "/bookings/42")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(large_booking().to_string())
        .create_async()
        .await;
    server
        .mock("GET", "/invoices/9")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"id": 9, "lines": "y".repeat(2000)}).to_string())
        .create_async()
        .await;

    let (_, headers, body) = send(&h.app, get("/api/v1/bookings/42?full=true")).await;
    assert!(!headers.contains_key(SUMMARIZED_HEADER));
    assert_eq!(body, large_booking());

    let (_, headers, body) = send(&h.app, get("/api/v1/invoices/9")).await;
    assert!(!headers.contains_key(SUMMARIZED_HEADER));
    assert_eq!(body["id"], 9);
}

#[tokio::test]
async fn test_existing_summary_is_left_alone() {
    let mut server = Server::new_async().await;
    let h = harness(&mut server).await;
    let envelope = json!({
        "summary": {"id": 1, "note": "z".repeat(2000)},
        "meta": {"kind": "preview"},
    });
    server
        .mock("GET", "/bookings/1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(envelope.to_string())
        .create_async()
        .await;

    let (_, headers, body) = send(&h.app, get("/api/v1/bookings/1")).await;
    assert!(!headers.contains_key(SUMMARIZED_HEADER));
    assert_eq!(body, envelope);
}

#[tokio::test]
async fn test_pagination_walk_keeps_filters() {
    let mut server = Server::new_async().await;
    let h = harness(&mut server).await;
    server
        .mock("GET", "/bookings")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("offset".into(), "0".into()),
            Matcher::UrlEncoded("limit".into(), "2".into()),
            Matcher::UrlEncoded("status".into(), "confirmed".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"data":[{"id":1},{"id":2}],"total":3}"#)
        .create_async()
        .await;
    let second = server
        .mock("GET", "/bookings")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("offset".into(), "2".into()),
            Matcher::UrlEncoded("status".into(), "confirmed".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"data":[{"id":3}],"total":3}"#)
        .expect(1)
        .create_async()
        .await;

    let (status, _, first) = send(&h.app, get("/api/v1/bookings?status=confirmed")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["items"], json!([{"id": 1}, {"id": 2}]));
    assert_eq!(first["meta"]["total_count"], 3);
    assert_eq!(first["meta"]["page_size"], 2);
    assert_eq!(first["meta"]["has_more"], true);

    let cursor = first["next_cursor"].as_str().unwrap().to_string();
    let (status, _, last) = send(&h.app, get(&format!("/api/v1/bookings?cursor={}", cursor))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(last["items"], json!([{"id": 3}]));
    assert_eq!(last["meta"]["has_more"], false);
    assert!(last["next_cursor"].is_null());
    second.assert_async().await;
}

#[tokio::test]
async fn test_bad_cursors_are_distinguished() {
    let mut server = Server::new_async().await;
    let h = harness(&mut server).await;

    let (status, _, body) = send(&h.app, get("/api/v1/bookings?cursor=not-a-cursor")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "CURSOR_MALFORMED");

    let foreign = CursorCodec::new(SecretString::new("other-secret".to_string()))
        .encode(2, None, None)
        .unwrap();
    let (status, _, body) = send(&h.app, get(&format!("/api/v1/bookings?cursor={}", foreign))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "CURSOR_TAMPERED");

    let stale = CursorCodec::new(SecretString::new("test-secret".to_string()))
        .encode_at(2, 1_000.0, None, None)
        .unwrap();
    let (status, _, body) = send(&h.app, get(&format!("/api/v1/bookings?cursor={}", stale))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "CURSOR_EXPIRED");
    assert!(body["message"].as_str().unwrap().contains("fresh page"));
}

#[tokio::test]
async fn test_upstream_errors_are_not_summarized() {
    let mut server = Server::new_async().await;
    let h = harness(&mut server).await;
    server
        .mock("GET", "/bookings/404")
        .with_status(404)
        .with_body("no such booking")
        .create_async()
        .await;

    let (status, headers, body) = send(&h.app, get("/api/v1/bookings/404")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(!headers.contains_key(SUMMARIZED_HEADER));
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_requests_without_key_rejected() {
    let mut server = Server::new_async().await;
    let h = harness(&mut server).await;

    let request = Request::builder()
        .uri("/api/v1/bookings/1")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_policy_reload_applies_without_restart() {
    let mut server = Server::new_async().await;
    let h = harness(&mut server).await;
    server
        .mock("GET", "/bookings/42")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(large_booking().to_string())
        .expect(3)
        .create_async()
        .await;

    let (_, headers, _) = send(&h.app, get("/api/v1/bookings/42")).await;
    assert!(headers.contains_key(SUMMARIZED_HEADER));

    std::fs::write(h.policy_file.path(), "global:\n  output_token_threshold: 5000\n").unwrap();
    h.policies.reload().unwrap();
    let (_, headers, _) = send(&h.app, get("/api/v1/bookings/42")).await;
    assert!(!headers.contains_key(SUMMARIZED_HEADER));

    // a broken file keeps the last good policy
    std::fs::write(h.policy_file.path(), "global: [").unwrap();
    assert!(h.policies.reload().is_err());
    let (_, headers, _) = send(&h.app, get("/api/v1/bookings/42")).await;
    assert!(!headers.contains_key(SUMMARIZED_HEADER));
}

#[tokio::test]
async fn test_health_and_metrics() {
    let mut server = Server::new_async().await;
    let h = harness(&mut server).await;

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, _, body) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["policy_version"], 1);
    assert_eq!(body["in_flight"], 0);

    let response = h
        .app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(text.to_vec()).unwrap();
    // the health response above was recorded as an under-budget pass
    assert!(text.contains("gateway_responses_total"));
}
