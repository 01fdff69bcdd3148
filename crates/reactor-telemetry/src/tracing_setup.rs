use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use tracing::Span;
use uuid::Uuid;

/// Generate a new trace ID, used to correlate a mutation through the
/// dispatcher, webhook delivery, and script execution pipeline.
pub fn generate_trace_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a new span ID, used for sub-steps within a single trace (e.g.
/// one delivery attempt within a webhook fan-out).
pub fn generate_span_id() -> String {
    Uuid::new_v4().simple().to_string()[..16].to_string()
}

/// axum middleware that stamps every request with an `x-request-id` header
/// (reusing an inbound one if present) and records it on the current span.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(generate_trace_id);

    request
        .headers_mut()
        .insert("x-request-id", HeaderValue::from_str(&request_id).unwrap());

    let span = Span::current();
    span.record("request_id", tracing::field::display(&request_id));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Create a `tracing::Span` for a top-level operation (e.g. "webhook_dispatch",
/// "script_execution", "cron_tick"), tagged with a fresh trace ID.
pub fn create_operation_span(operation: &str) -> Span {
    let trace_id = generate_trace_id();
    tracing::info_span!("operation", operation = %operation, trace_id = %trace_id)
}

/// Create a child span nested under an existing trace, used for per-attempt
/// or per-subscription work inside a larger operation.
pub fn create_child_span(parent_trace_id: &str, operation: &str) -> Span {
    let span_id = generate_span_id();
    tracing::info_span!(
        "child_operation",
        operation = %operation,
        trace_id = %parent_trace_id,
        span_id = %span_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_trace_id_unique() {
        let a = generate_trace_id();
        let b = generate_trace_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }

    #[test]
    fn test_generate_span_id_length() {
        let id = generate_span_id();
        assert_eq!(id.len(), 16);
    }

    #[test]
    fn test_create_operation_span_does_not_panic() {
        let _span = create_operation_span("webhook_dispatch");
        let _child = create_child_span("trace-123", "delivery_attempt");
    }
}
