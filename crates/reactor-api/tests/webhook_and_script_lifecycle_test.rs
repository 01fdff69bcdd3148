//! End-to-end operator-surface flows against the real router, exercising
//! webhook/script CRUD and the schedule state machine together — the kind
//! of multi-endpoint flow a single handler test can't cover. Mirrors
//! `at-bridge`'s `tests/http_api_test.rs` style: build the full router,
//! drive it with `tower::ServiceExt::oneshot`, assert on both status and
//! body.

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
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn test_app() -> axum::Router {
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
    let state = ApiState::new(store, cron, election, lock, coordination, dispatch, "integration-test");
    reactor_api::api_router(state)
}

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn webhook_crud_round_trips() {
    let app = test_app();

    let create_body = json!({
        "name": "order-hook",
        "url": "https://example.com/hook",
        "collection": "orders",
        "events": ["create", "update"],
    });
    let req = Request::builder()
        .method("POST")
        .uri("/webhooks")
        .header("content-type", "application/json")
        .body(Body::from(create_body.to_string()))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created = body_json(resp).await;
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["max_requests_per_minute"], 60);
    assert_eq!(created["max_retries"], 3);

    let req = Request::builder()
        .uri(format!("/webhooks/{id}"))
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let patch_body = json!({"enabled": false, "max_retries": 5});
    let req = Request::builder()
        .method("PUT")
        .uri(format!("/webhooks/{id}"))
        .header("content-type", "application/json")
        .body(Body::from(patch_body.to_string()))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let updated = body_json(resp).await;
    assert_eq!(updated["enabled"], false);
    assert_eq!(updated["max_retries"], 5);
    assert_eq!(updated["url"], "https://example.com/hook");

    let req = Request::builder()
        .method("DELETE")
        .uri(format!("/webhooks/{id}"))
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let req = Request::builder()
        .uri(format!("/webhooks/{id}"))
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn script_schedule_pause_resume_and_delete_cycle() {
    let app = test_app();

    let create_body = json!({
        "name": "nightly-report",
        "source": "1",
        "collection": "",
        "events": ["create"],
    });
    let req = Request::builder()
        .method("POST")
        .uri("/scripts")
        .header("content-type", "application/json")
        .body(Body::from(create_body.to_string()))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let script_id = body_json(resp).await["id"].as_str().unwrap().to_string();

    let schedule_body = json!({"cron_expression": "0 0 0 * * *"});
    let req = Request::builder()
        .method("POST")
        .uri(format!("/scripts/{script_id}/schedule"))
        .header("content-type", "application/json")
        .body(Body::from(schedule_body.to_string()))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let scheduled = body_json(resp).await;
    assert_eq!(scheduled["state"], "installed-running");

    let req = Request::builder()
        .method("POST")
        .uri(format!("/scripts/{script_id}/pause"))
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let paused = body_json(resp).await;
    assert_eq!(paused["state"], "installed-paused");

    let req = Request::builder()
        .method("POST")
        .uri(format!("/scripts/{script_id}/resume"))
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["state"], "installed-running");

    let req = Request::builder()
        .method("DELETE")
        .uri(format!("/scripts/{script_id}"))
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let req = Request::builder()
        .uri(format!("/scripts/{script_id}/schedule"))
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn mutation_ingest_reaches_cluster_health_queue_accounting() {
    let app = test_app();

    let req = Request::builder()
        .uri("/cluster/health")
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let health = body_json(resp).await;
    assert_eq!(health["queue"]["webhook_retries"], 0);
    assert_eq!(health["queue"]["script_retries"], 0);

    let mutation_body = json!({
        "collection": "orders",
        "event": "create",
        "new": {"status": "paid"},
    });
    let req = Request::builder()
        .method("POST")
        .uri("/mutations")
        .header("content-type", "application/json")
        .body(Body::from(mutation_body.to_string()))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
}
