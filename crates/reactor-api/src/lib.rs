//! Operator HTTP surface (§4.9/§6, "C11 Operator Surface"): CRUD over
//! webhook and script subscriptions, schedule operations, and cluster
//! introspection. The router construction and auth-layering shape is
//! adapted from the retrieved `at-bridge::http_api`'s `api_router`/
//! `api_router_with_auth` split.

mod auth;
mod cluster;
mod error;
mod mutations;
mod scripts;
mod state;
mod types;
mod webhooks;

pub use error::ApiError;
pub use state::ApiState;

use axum::{
    middleware as axum_middleware,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use auth::AuthLayer;
use reactor_telemetry::middleware::metrics_middleware;
use reactor_telemetry::tracing_setup::request_id_middleware;

/// Build the router with no authentication (development / single-tenant
/// deployments where `admin_bearer_token` is unset).
pub fn api_router(state: Arc<ApiState>) -> Router {
    api_router_with_auth(state, None)
}

/// Build the full operator-surface router, optionally gated by a bearer
/// token.
pub fn api_router_with_auth(state: Arc<ApiState>, admin_bearer_token: Option<String>) -> Router {
    Router::new()
        .route("/mutations", post(mutations::ingest_mutation))
        .route("/webhooks", get(webhooks::list_webhooks))
        .route("/webhooks", post(webhooks::create_webhook))
        .route("/webhooks/{id}", get(webhooks::get_webhook))
        .route("/webhooks/{id}", put(webhooks::update_webhook))
        .route("/webhooks/{id}", delete(webhooks::delete_webhook))
        .route("/scripts", get(scripts::list_scripts))
        .route("/scripts", post(scripts::create_script))
        .route("/scripts/{id}", get(scripts::get_script))
        .route("/scripts/{id}", put(scripts::update_script))
        .route("/scripts/{id}", delete(scripts::delete_script))
        .route("/scripts/schedules", get(scripts::list_schedules))
        .route("/scripts/{id}/schedule", get(scripts::get_schedule))
        .route("/scripts/{id}/schedule", post(scripts::create_schedule))
        .route("/scripts/{id}/schedule", put(scripts::reschedule))
        .route("/scripts/{id}/schedule", delete(scripts::delete_schedule))
        .route("/scripts/{id}/pause", post(scripts::pause_schedule))
        .route("/scripts/{id}/resume", post(scripts::resume_schedule))
        .route("/scripts/{id}/trigger", post(scripts::trigger_now))
        .route("/cluster/status", get(cluster::status))
        .route("/cluster/leadership", get(cluster::leadership))
        .route("/cluster/locks", get(cluster::locks))
        .route("/cluster/health", get(cluster::health))
        .route("/cluster/metrics", get(cluster::metrics_prometheus))
        .route("/cluster/metrics/json", get(cluster::metrics_json))
        .layer(axum_middleware::from_fn(metrics_middleware))
        .layer(axum_middleware::from_fn(request_id_middleware))
        .layer(AuthLayer::new(admin_bearer_token))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reactor_coordination::CoordinationClient;
    use reactor_cron::CronScheduler;
    use reactor_dispatch::ReactionDispatcher;
    use reactor_election::LeaderElection;
    use reactor_lock::DistributedLock;
    use reactor_retry::BackoffConfig;
    use reactor_sandbox::Sandbox;
    use reactor_store::InMemoryStore;
    use reactor_webhook::WebhookDispatcher;
    use std::time::Duration;

    /// Builds a router against entirely in-memory/lazy backends: the
    /// `redis::Client` handles here never open a connection until a command
    /// is actually issued, so these tests never touch the network (mirrors
    /// `reactor_election`'s own unit tests).
    pub(crate) fn test_app() -> (Router, Arc<ApiState>) {
        let coordination = CoordinationClient::new("redis://127.0.0.1:6379").unwrap();
        let lock = DistributedLock::new(coordination.clone(), "test-instance");
        let election = LeaderElection::new(lock.clone(), "cron", 30_000, 15_000).unwrap();
        let store: Arc<dyn reactor_store::SubscriptionStore> = Arc::new(InMemoryStore::new());
        let sandbox = Arc::new(Sandbox::new(Duration::from_secs(1)));
        let cron = CronScheduler::new(store.clone(), lock.clone(), sandbox.clone(), 30_000, true);
        let webhook = Arc::new(WebhookDispatcher::new(
            coordination.clone(),
            lock.clone(),
            "test-instance",
            Duration::from_secs(10),
            30_000,
        ));
        let backoff = BackoffConfig {
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            multiplier: 2.0,
            max_retries: 3,
        };
        let dispatch = ReactionDispatcher::new(store.clone(), webhook, sandbox, backoff, backoff);
        let state = ApiState::new(store, cron, election, lock, coordination, dispatch, "test-instance");
        (api_router(state.clone()), state)
    }

    #[tokio::test]
    async fn router_builds_and_responds() {
        let (app, _state) = test_app();
        let req = axum::http::Request::builder()
            .uri("/cluster/status")
            .body(axum::body::Body::empty())
            .unwrap();
        let resp = tower::ServiceExt::oneshot(app, req).await.unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::OK);
    }
}
