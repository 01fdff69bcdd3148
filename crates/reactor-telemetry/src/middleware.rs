use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;

use crate::metrics::global_metrics;

/// axum middleware that records request counts and latency into the global
/// `MetricsCollector`, keyed by route and status code.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let method = request.method().to_string();

    let start = Instant::now();
    let response = next.run(request).await;
    let elapsed = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    let metrics = global_metrics();
    metrics.increment_counter(
        "api_requests_total",
        &[("method", &method), ("path", &path), ("status", &status)],
    );
    metrics.record_histogram("api_request_duration_seconds", elapsed);

    response
}
