use axum::{http::StatusCode, response::IntoResponse};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub struct MetricsRecorder {
    handle: PrometheusHandle,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder");

        metrics::describe_counter!(
            "gateway_http_requests_total",
            "Total number of HTTP requests"
        );
        metrics::describe_histogram!(
            "gateway_http_request_duration_seconds",
            "HTTP request duration in seconds"
        );
        metrics::describe_counter!(
            "auth_challenges_issued_total",
            "Challenges minted via /v1/auth/challenge"
        );
        metrics::describe_counter!(
            "auth_verifications_total",
            "Successful proof-of-possession verifications"
        );
        metrics::describe_counter!(
            "auth_verification_failures_total",
            "Failed proof-of-possession verifications"
        );
        metrics::describe_counter!(
            "did_resolutions_total",
            "DID resolutions attempted (cache misses)"
        );
        metrics::describe_counter!(
            "gateway_rate_limited_total",
            "Requests denied by the per-DID rate limiter"
        );
        metrics::describe_counter!(
            "proxy_upstream_errors_total",
            "Upstream requests that failed at the transport level"
        );

        Self { handle }
    }

    pub fn handle(&self) -> &PrometheusHandle {
        &self.handle
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Handler for Prometheus metrics endpoint
pub async fn metrics_handler(
    handle: axum::extract::State<PrometheusHandle>,
) -> impl IntoResponse {
    (StatusCode::OK, handle.render())
}

/// Middleware to track HTTP request metrics
pub async fn track_request_metrics(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> impl IntoResponse {
    let start = std::time::Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed();

    metrics::counter!("gateway_http_requests_total", 1);
    metrics::histogram!(
        "gateway_http_request_duration_seconds",
        duration.as_secs_f64()
    );

    response
}
