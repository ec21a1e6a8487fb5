//! Prometheus metrics for gateway observability.
//!
//! Exposes metrics compatible with Prometheus/OpenMetrics format:
//! - `llmgate_requests_total{provider,model,status}` - Counter of proxied requests
//! - `llmgate_request_duration_seconds{provider}` - Histogram of time to upstream headers
//! - `llmgate_registry_invalid_records_total` - Registry records skipped on scan
//! - `llmgate_kv_breaker_trips_total{breaker}` - KV circuit breaker openings
//! - `llmgate_rate_limited_total{app}` - Requests rejected by the rate limiter
//! - `llmgate_auth_failures_total` - Rejected credentials
//! - `llmgate_stream_truncated_total{provider}` - Streams cut by the write deadline
//! - `llmgate_policy_violations_total{policy}` - Requests rejected by an app policy
//! - `llmgate_tokens_total{provider,model,kind}` - Upstream-reported prompt/completion tokens
//! - `llmgate_uptime_seconds` - Gauge of server uptime

use axum::http::StatusCode;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use parking_lot::Mutex;
use llmgate_types::TokenUsage;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use super::middleware::Recorder;
use super::ProxyRequest;

/// Global Prometheus handle for rendering metrics
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Global server start time for uptime calculation
static METRICS_START_TIME: OnceLock<Instant> = OnceLock::new();

/// Serialises recorder installation
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Histogram buckets tuned for LLM latency: fast cached answers around
/// 100ms-1s and long generations out to a minute.
const LLM_LATENCY_BUCKETS: &[f64] = &[
    0.1,  // 100ms - very fast (cache hits)
    0.25, // 250ms - fast
    0.5,  // 500ms - typical short response
    1.0,  // 1s - normal response
    2.0,  // 2s - moderate generation
    5.0,  // 5s - longer generation
    10.0, // 10s - complex reasoning
    30.0, // 30s - extended generation
    60.0, // 60s - very long operations
];

/// Install the Prometheus recorder. Later calls return the first handle.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let _ = METRICS_START_TIME.get_or_init(Instant::now);

    let _guard = INIT_LOCK.lock();
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().set_buckets(LLM_LATENCY_BUCKETS)?.install_recorder()?;
    describe_metrics();

    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

fn describe_metrics() {
    describe_counter!("llmgate_requests_total", "Total number of proxied requests");
    describe_histogram!(
        "llmgate_request_duration_seconds",
        "Time from request start to upstream response headers"
    );
    describe_counter!(
        "llmgate_registry_invalid_records_total",
        "Registry records skipped because they failed to decode"
    );
    describe_counter!("llmgate_kv_breaker_trips_total", "KV circuit breaker openings");
    describe_counter!("llmgate_rate_limited_total", "Requests rejected by the rate limiter");
    describe_counter!("llmgate_auth_failures_total", "Requests rejected by authentication");
    describe_counter!(
        "llmgate_stream_truncated_total",
        "Response streams cut short by the write deadline"
    );
    describe_counter!("llmgate_policy_violations_total", "Requests rejected by an app policy");
    describe_counter!("llmgate_tokens_total", "Tokens reported in upstream usage objects");
    describe_gauge!("llmgate_uptime_seconds", "Server uptime in seconds");
}

/// Get the Prometheus handle for rendering metrics.
/// Returns None if metrics have not been initialized.
pub fn get_prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Record a completed request with labels.
pub fn record_request(provider: &str, model: &str, status: u16, duration: Duration) {
    let labels = [
        ("provider", provider.to_string()),
        ("model", model.to_string()),
        ("status", status_category(status).to_string()),
    ];
    counter!("llmgate_requests_total", &labels).increment(1);
    histogram!("llmgate_request_duration_seconds", "provider" => provider.to_string())
        .record(duration.as_secs_f64());
}

pub fn record_rate_limited(app: &str) {
    counter!("llmgate_rate_limited_total", "app" => app.to_string()).increment(1);
}

pub fn record_auth_failure() {
    counter!("llmgate_auth_failures_total").increment(1);
}

pub fn record_stream_truncated(provider: &str) {
    counter!("llmgate_stream_truncated_total", "provider" => provider.to_string()).increment(1);
}

pub fn record_policy_violation(policy: &str) {
    counter!("llmgate_policy_violations_total", "policy" => policy.to_string()).increment(1);
}

/// Record upstream-reported token counts.
pub fn record_token_usage(provider: &str, model: &str, usage: &TokenUsage) {
    for (kind, count) in [("prompt", usage.prompt_tokens), ("completion", usage.completion_tokens)]
    {
        counter!(
            "llmgate_tokens_total",
            "provider" => provider.to_string(),
            "model" => model.to_string(),
            "kind" => kind
        )
        .increment(count);
    }
}

/// Render all metrics in Prometheus text format.
pub fn render_metrics() -> String {
    if let Some(start) = METRICS_START_TIME.get() {
        gauge!("llmgate_uptime_seconds").set(start.elapsed().as_secs_f64());
    }

    if let Some(handle) = get_prometheus_handle() {
        handle.render()
    } else {
        String::from("# Metrics not initialized\n")
    }
}

/// Convert HTTP status code to category for metrics labels.
pub fn status_category(status: u16) -> &'static str {
    match status {
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    }
}

/// [`Recorder`] backed by the global `metrics` recorder.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusRecorder;

impl Recorder for PrometheusRecorder {
    fn record(&self, req: &ProxyRequest, status: StatusCode, elapsed: Duration) {
        record_request(&req.adapter.name(), &req.model, status.as_u16(), elapsed);
    }

    fn record_usage(&self, req: &ProxyRequest, usage: &TokenUsage) {
        record_token_usage(&req.adapter.name(), &req.model, usage);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_category() {
        assert_eq!(status_category(200), "2xx");
        assert_eq!(status_category(404), "4xx");
        assert_eq!(status_category(500), "5xx");
        assert_eq!(status_category(301), "3xx");
        assert_eq!(status_category(99), "other");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_metrics().unwrap();
        init_metrics().unwrap();
        record_request("openai", "gpt-4o", 200, Duration::from_millis(120));
        let rendered = render_metrics();
        assert!(rendered.contains("llmgate_requests_total"));
        assert!(rendered.contains("status=\"2xx\""));
    }

    #[test]
    fn test_token_usage_is_counted_by_kind() {
        init_metrics().unwrap();
        let usage = TokenUsage { prompt_tokens: 11, completion_tokens: 5, total_tokens: 16 };
        record_token_usage("openai", "gpt-4o-usage", &usage);
        record_policy_violation("model-allowlist");
        let rendered = render_metrics();
        assert!(rendered.contains("llmgate_tokens_total"));
        assert!(rendered.contains("kind=\"completion\""));
        assert!(rendered.contains("llmgate_policy_violations_total"));
    }
}
