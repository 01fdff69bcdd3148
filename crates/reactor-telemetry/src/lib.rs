//! Observability infrastructure shared by every reactor service.
//!
//! - **Logging**: human-readable and JSON output via `tracing-subscriber`.
//! - **Metrics**: thread-safe counters, gauges, and histograms with
//!   Prometheus export, used by C6/C7/C8's delivery/execution counters and
//!   C11's `/cluster/metrics` endpoint.
//! - **Middleware**: axum middleware for request metrics and delivery/trace
//!   ID stamping.

pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod tracing_setup;
