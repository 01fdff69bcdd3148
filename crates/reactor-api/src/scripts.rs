//! `/scripts` CRUD plus schedule/pause/resume/trigger operations (§4.7, §4.9,
//! §6).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::ApiState;
use crate::types::{CreateScriptRequest, RescheduleRequest, ScheduleRequest, UpdateScriptRequest};

pub async fn list_scripts(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(state.store.list_scripts().await)
}

pub async fn create_script(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<CreateScriptRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let created = state.store.create_script(req.into()).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_script(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .store
        .get_script(id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no script with id {id}")))
}

pub async fn update_script(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateScriptRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let updated = state.store.update_script(id, req.into()).await?;
    Ok(Json(updated))
}

pub async fn delete_script(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    // A script being unscheduled first keeps the cron scheduler's task map
    // from holding a handle to a subscription that no longer exists.
    let _ = state.cron.unschedule(id).await;
    state.store.delete_script(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_schedule(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .store
        .get_scheduled(id)
        .await
        .map(|job| Json(reactor_types::ScheduledView::from(&job)))
        .ok_or_else(|| ApiError::NotFound(format!("no scheduled job for script {id}")))
}

pub async fn list_schedules(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let jobs = state.store.list_scheduled().await;
    Json(
        jobs.iter()
            .map(reactor_types::ScheduledView::from)
            .collect::<Vec<_>>(),
    )
}

pub async fn create_schedule(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ScheduleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if state.store.get_script(id).await.is_none() {
        return Err(ApiError::BadRequest(format!(
            "script {id} has no subscription to schedule"
        )));
    }
    let job = state.cron.schedule(id, req.cron_expression, req.payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(reactor_types::ScheduledView::from(&job)),
    ))
}

pub async fn reschedule(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<RescheduleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.cron.reschedule(id, req.cron_expression).await?;
    Ok(Json(reactor_types::ScheduledView::from(&job)))
}

pub async fn delete_schedule(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.cron.unschedule(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn pause_schedule(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.cron.pause(id).await?;
    Ok(Json(reactor_types::ScheduledView::from(&job)))
}

pub async fn resume_schedule(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.cron.resume(id).await?;
    Ok(Json(reactor_types::ScheduledView::from(&job)))
}

pub async fn trigger_now(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.cron.trigger_now(id).await?;
    Ok(StatusCode::ACCEPTED)
}

#[cfg(test)]
mod tests {
    use crate::tests::test_app;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    #[tokio::test]
    async fn create_then_schedule_script() {
        let (app, _state) = test_app();
        let body = json!({
            "name": "nightly-audit",
            "source": "1",
            "collection": "",
            "events": ["create"],
        });
        let req = Request::builder()
            .method("POST")
            .uri("/scripts")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let created: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let id = created["id"].as_str().unwrap();

        let schedule_body = json!({"cron_expression": "0 0 * * * *"});
        let req = Request::builder()
            .method("POST")
            .uri(format!("/scripts/{id}/schedule"))
            .header("content-type", "application/json")
            .body(Body::from(schedule_body.to_string()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn schedule_for_missing_script_is_bad_request() {
        let (app, _state) = test_app();
        let body = json!({"cron_expression": "0 0 * * * *"});
        let req = Request::builder()
            .method("POST")
            .uri(format!("/scripts/{}/schedule", uuid::Uuid::new_v4()))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn pause_missing_schedule_returns_404() {
        let (app, _state) = test_app();
        let req = Request::builder()
            .method("POST")
            .uri(format!("/scripts/{}/pause", uuid::Uuid::new_v4()))
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
