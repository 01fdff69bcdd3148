//! End-to-end bearer-token gating through `api_router_with_auth`: unlike
//! `auth::tests`, which exercises `AuthLayer` against a toy router, this
//! drives the real operator surface to confirm the layer is actually wired
//! in front of every route rather than just unit-tested in isolation.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use reactor_api::ApiState;
use reactor_coordination::CoordinationClient;
use reactor_cron::CronScheduler;
use reactor_dispatch::ReactionDispatcher;
use reactor_election::LeaderElection;
use reactor_lock::DistributedLock;
use reactor_retry::BackoffConfig;
use reactor_sandbox::Sandbox;
use reactor_store::InMemoryStore;
use reactor_webhook::WebhookDispatcher;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn test_state() -> Arc<ApiState> {
    let coordination = CoordinationClient::new("redis://127.0.0.1:6379").unwrap();
    let lock = DistributedLock::new(coordination.clone(), "integration-test");
    let election = LeaderElection::new(lock.clone(), "cron", 30_000, 15_000).unwrap();
    let store: Arc<dyn reactor_store::SubscriptionStore> = Arc::new(InMemoryStore::new());
    let sandbox = Arc::new(Sandbox::new(Duration::from_secs(1)));
    let cron = CronScheduler::new(store.clone(), lock.clone(), sandbox.clone(), 30_000, true);
    let webhook = Arc::new(WebhookDispatcher::new(
        coordination.clone(),
        lock.clone(),
        "integration-test",
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
    ApiState::new(store, cron, election, lock, coordination, dispatch, "integration-test")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn no_token_configured_allows_every_route() {
    let app = reactor_api::api_router_with_auth(test_state(), None);

    let resp = app.clone().oneshot(get("/cluster/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app.oneshot(get("/webhooks")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn configured_token_blocks_unauthenticated_requests() {
    let app =
        reactor_api::api_router_with_auth(test_state(), Some("admin-secret".to_string()));

    let resp = app.clone().oneshot(get("/cluster/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app.oneshot(get("/webhooks")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn configured_token_rejects_wrong_bearer_token() {
    let app =
        reactor_api::api_router_with_auth(test_state(), Some("admin-secret".to_string()));

    let req = Request::builder()
        .uri("/cluster/health")
        .header("Authorization", "Bearer wrong-token")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn configured_token_accepts_matching_bearer_token() {
    let app =
        reactor_api::api_router_with_auth(test_state(), Some("admin-secret".to_string()));

    let req = Request::builder()
        .uri("/cluster/health")
        .header("Authorization", "Bearer admin-secret")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn configured_token_accepts_x_api_key_header() {
    let app =
        reactor_api::api_router_with_auth(test_state(), Some("admin-secret".to_string()));

    let req = Request::builder()
        .uri("/scripts")
        .header("X-API-Key", "admin-secret")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
