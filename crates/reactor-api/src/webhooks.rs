//! `/webhooks` CRUD (§4.9, §6).

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
use crate::types::{CreateWebhookRequest, UpdateWebhookRequest};

pub async fn list_webhooks(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(state.store.list_webhooks().await)
}

pub async fn create_webhook(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<CreateWebhookRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let created = state.store.create_webhook(req.into()).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_webhook(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .store
        .get_webhook(id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no webhook with id {id}")))
}

pub async fn update_webhook(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateWebhookRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let updated = state.store.update_webhook(id, req.into()).await?;
    Ok(Json(updated))
}

pub async fn delete_webhook(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.store.delete_webhook(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
