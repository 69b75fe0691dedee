//! Metrics collection for observability
//!
//! A [`Metrics`] instance owns its own registry and is shared as
//! `Arc<Metrics>` by the services that record into it.

use prometheus::{
    register_counter_vec_with_registry, register_counter_with_registry,
    register_histogram_vec_with_registry, register_histogram_with_registry,
    register_int_gauge_with_registry, Counter, CounterVec, Histogram, HistogramVec, IntGauge,
    Opts, Registry,
};
use std::time::Duration;

/// Metrics collector
pub struct Metrics {
    registry: Registry,

    // Gateway metrics
    pub gateway_responses: CounterVec,
    pub estimated_tokens: Histogram,
    pub token_reduction_ratio: Histogram,
    pub field_reduction_ratio: Histogram,

    // Pagination metrics
    pub cursor_errors: CounterVec,
    pub pages_served: Counter,

    // Policy metrics
    pub policy_reloads: CounterVec,

    // Rate limiting metrics
    pub rate_limit_wait: Histogram,
    pub in_flight: IntGauge,

    // Upstream metrics
    pub upstream_requests: CounterVec,
    pub upstream_duration: HistogramVec,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let gateway_responses = register_counter_vec_with_registry!(
            Opts::new(
                "gateway_responses_total",
                "Responses leaving the gateway by outcome"
            ),
            &["outcome"],
            registry
        )?;

        let estimated_tokens = register_histogram_with_registry!(
            "gateway_estimated_tokens",
            "Estimated tokens per inspected response body",
            vec![50.0, 100.0, 250.0, 500.0, 1000.0, 2000.0, 5000.0, 10000.0, 50000.0],
            registry
        )?;

        let token_reduction_ratio = register_histogram_with_registry!(
            "gateway_token_reduction_ratio",
            "Share of estimated tokens removed by summarization",
            vec![0.1, 0.25, 0.5, 0.75, 0.9, 0.95, 0.99],
            registry
        )?;

        let field_reduction_ratio = register_histogram_with_registry!(
            "gateway_field_reduction_ratio",
            "Share of fields removed by summarization",
            vec![0.1, 0.25, 0.5, 0.75, 0.9, 0.95, 0.99],
            registry
        )?;

        let cursor_errors = register_counter_vec_with_registry!(
            Opts::new("cursor_errors_total", "Rejected pagination cursors by kind"),
            &["kind"],
            registry
        )?;

        let pages_served = register_counter_with_registry!(
            Opts::new("pages_served_total", "Paginated pages returned"),
            registry
        )?;

        let policy_reloads = register_counter_vec_with_registry!(
            Opts::new("policy_reloads_total", "Budget policy reload attempts"),
            &["status"],
            registry
        )?;

        let rate_limit_wait = register_histogram_with_registry!(
            "rate_limit_wait_seconds",
            "Time spent waiting for rate limiter admission",
            vec![0.0, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            registry
        )?;

        let in_flight = register_int_gauge_with_registry!(
            Opts::new("rate_limit_in_flight", "Admitted upstream calls in progress"),
            registry
        )?;

        let upstream_requests = register_counter_vec_with_registry!(
            Opts::new("upstream_requests_total", "Upstream API calls"),
            &["method", "status"],
            registry
        )?;

        let upstream_duration = register_histogram_vec_with_registry!(
            "upstream_request_duration_seconds",
            "Upstream API call duration in seconds",
            &["method"],
            registry
        )?;

        Ok(Self {
            registry,
            gateway_responses,
            estimated_tokens,
            token_reduction_ratio,
            field_reduction_ratio,
            cursor_errors,
            pages_served,
            policy_reloads,
            rate_limit_wait,
            in_flight,
            upstream_requests,
            upstream_duration,
        })
    }

    /// Get the metrics registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record how the gateway handled a response
    pub fn record_gateway_outcome(&self, outcome: &str, estimated_tokens: Option<usize>) {
        self.gateway_responses.with_label_values(&[outcome]).inc();
        if let Some(tokens) = estimated_tokens {
            self.estimated_tokens.observe(tokens as f64);
        }
    }

    /// Record the reduction achieved by a summarization
    pub fn record_reduction(&self, field_ratio: f64, token_ratio: f64) {
        self.field_reduction_ratio.observe(field_ratio);
        self.token_reduction_ratio.observe(token_ratio);
    }

    pub fn record_cursor_error(&self, kind: &str) {
        self.cursor_errors.with_label_values(&[kind]).inc();
    }

    pub fn record_page_served(&self) {
        self.pages_served.inc();
    }

    /// Record a policy reload attempt
    pub fn record_policy_reload(&self, success: bool) {
        let status = if success { "success" } else { "error" };
        self.policy_reloads.with_label_values(&[status]).inc();
    }

    /// Record how long a caller waited for admission
    pub fn record_rate_limit_wait(&self, waited: Duration) {
        self.rate_limit_wait.observe(waited.as_secs_f64());
    }

    /// Record a finished upstream call
    pub fn record_upstream(&self, method: &str, status: Option<u16>, elapsed: Duration) {
        let status = status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "network_error".to_string());
        self.upstream_requests
            .with_label_values(&[method, &status])
            .inc();
        self.upstream_duration
            .with_label_values(&[method])
            .observe(elapsed.as_secs_f64());
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap_or_default();

        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        let metrics = Metrics::new();
        assert!(metrics.is_ok());
    }

    #[test]
    fn test_instances_do_not_share_registries() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.record_policy_reload(true);

        assert!(a.export_prometheus().contains("policy_reloads_total"));
        assert!(!b.export_prometheus().contains("policy_reloads_total{"));
    }

    #[test]
    fn test_export_contains_recorded_series() {
        let metrics = Metrics::new().unwrap();
        metrics.record_gateway_outcome("summarized", Some(1500));
        metrics.record_cursor_error("expired");
        metrics.record_upstream("GET", Some(200), Duration::from_millis(12));
        metrics.record_upstream("GET", None, Duration::from_millis(3));

        let text = metrics.export_prometheus();
        assert!(text.contains("gateway_responses_total{outcome=\"summarized\"} 1"));
        assert!(text.contains("cursor_errors_total{kind=\"expired\"} 1"));
        assert!(text.contains("status=\"network_error\""));
    }
}
