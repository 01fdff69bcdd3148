//! Cluster introspection endpoints (§6): `/cluster/{status,leadership,locks,
//! health,metrics}`.

use axum::{extract::State, response::IntoResponse, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::state::ApiState;
use reactor_telemetry::metrics::global_metrics;

#[derive(Serialize)]
struct ClusterStatus {
    instance_id: String,
    is_leader: bool,
    uptime_secs: i64,
}

pub async fn status(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let uptime_secs = (chrono::Utc::now() - state.started_at).num_seconds().max(0);
    Json(ClusterStatus {
        instance_id: state.instance_id.clone(),
        is_leader: state.election.is_leader(),
        uptime_secs,
    })
}

#[derive(Serialize)]
struct Leadership {
    leader: bool,
    lock_key: String,
}

pub async fn leadership(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(Leadership {
        leader: state.election.is_leader(),
        lock_key: state.election.lock_key(),
    })
}

#[derive(Serialize)]
struct LockView {
    key: String,
    owner_token: String,
    mine: bool,
}

/// Scans every coordination-store key (leadership, cron fencing, webhook
/// fencing all share the same store) and reports which this instance owns.
pub async fn locks(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let keys = state.coordination.scan_keys("*").await.unwrap_or_default();
    let mut views = Vec::with_capacity(keys.len());
    for key in keys {
        if let Ok(Some(info)) = state.lock.inspect(&key).await {
            views.push(LockView {
                key,
                owner_token: info.owner_token,
                mine: info.mine,
            });
        }
    }
    Json(views)
}

#[derive(Serialize)]
struct Health {
    ok: bool,
    queue: reactor_dispatch::QueueDepths,
    coordination_store: bool,
}

/// `{ok, queue, coordination_store}` per spec.md §6 — `ok` is true iff the
/// coordination store answers.
pub async fn health(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let coordination_store = state.coordination.get("__health_check__").await.is_ok();
    let queue = state.dispatch.queue_depths();
    Json(Health {
        ok: coordination_store,
        queue,
        coordination_store,
    })
}

pub async fn metrics_prometheus() -> impl IntoResponse {
    let body = global_metrics().export_prometheus();
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        body,
    )
}

pub async fn metrics_json() -> impl IntoResponse {
    Json(global_metrics().export_json())
}

#[cfg(test)]
mod tests {
    use crate::tests::test_app;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn status_reports_instance_id() {
        let (app, _state) = test_app();
        let req = Request::builder().uri("/cluster/status").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["instance_id"], "test-instance");
        assert_eq!(body["is_leader"], false);
    }

    #[tokio::test]
    async fn metrics_prometheus_returns_text() {
        let (app, _state) = test_app();
        let req = Request::builder().uri("/cluster/metrics").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
