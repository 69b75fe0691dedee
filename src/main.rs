use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use context_gateway::{
    api::{build_router, AppState},
    config::{GatewayConfig, LoggingConfig},
    context::SummarizationService,
    metrics::Metrics,
    middleware::{ContextGateway, RateLimiter},
    pagination::PaginationService,
    policy::{spawn_policy_watcher, PolicyStore},
    upstream::{CredentialDirectory, InMemoryDirectory, TokenRegistry, UpstreamClient},
};

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.clone()));

    let registry = tracing_subscriber::registry().with(filter);
    if logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("GATEWAY_CONFIG").ok())
        .map(PathBuf::from);
    let config = GatewayConfig::load(config_path.as_deref()).context("loading configuration")?;
    init_tracing(&config.logging);

    let metrics = Arc::new(Metrics::new().context("registering metrics")?);

    let policies = Arc::new(match &config.policy.path {
        Some(path) => PolicyStore::from_file(path),
        None => PolicyStore::with_defaults(),
    });
    let _watcher = spawn_policy_watcher(
        policies.clone(),
        config.policy.watch_settings(),
        Some(metrics.clone()),
    );

    let limiter = Arc::new(RateLimiter::new(&config.rate_limit)?.with_metrics(metrics.clone()));
    let upstream = UpstreamClient::new(&config.upstream, limiter.clone())?.with_metrics(metrics.clone());
    let tokens = Arc::new(TokenRegistry::new(
        upstream.http().clone(),
        config.upstream.token_url.clone(),
    ));

    let codec = Arc::new(config.cursor.build_codec());
    let pagination = Arc::new(PaginationService::new(
        codec,
        policies.clone(),
        config.cursor.ttl(),
    ));

    let summarizer = Arc::new(SummarizationService::default());
    let gateway = Arc::new(
        ContextGateway::new(policies.clone(), summarizer)
            .with_metrics(metrics.clone())
            .with_max_body_bytes(config.server.max_body_bytes),
    );

    let directory = InMemoryDirectory::from_seeds(&config.tenants);
    info!(tenants = directory.len(), "Credential directory loaded");
    let directory: Arc<dyn CredentialDirectory> = Arc::new(directory);

    let state = AppState {
        pagination,
        upstream: Arc::new(upstream),
        tokens,
        policies,
        limiter,
        metrics,
    };
    let app = build_router(state, gateway, directory, config.server.max_body_bytes);

    let address = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding {}", address))?;
    info!(address = %address, "Context gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    info!("Context gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
