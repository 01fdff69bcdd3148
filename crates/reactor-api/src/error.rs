//! HTTP error type for the operator surface, mirroring the
//! `at-bridge::api_error::ApiError` shape: a small enum of response classes,
//! each carrying its own message, converted to a JSON `{"error": ...}` body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

impl From<reactor_store::StoreError> for ApiError {
    fn from(err: reactor_store::StoreError) -> Self {
        match err {
            reactor_store::StoreError::NotFound(id) => {
                ApiError::NotFound(format!("no subscription with id {id}"))
            }
            reactor_store::StoreError::Validation(e) => ApiError::BadRequest(e.to_string()),
        }
    }
}

impl From<reactor_cron::CronError> for ApiError {
    fn from(err: reactor_cron::CronError) -> Self {
        match err {
            reactor_cron::CronError::InvalidExpression(e) => ApiError::BadRequest(e),
            reactor_cron::CronError::NotFound(id) => {
                ApiError::NotFound(format!("no scheduled job for script {id}"))
            }
            reactor_cron::CronError::ScriptMissing(id) => {
                ApiError::BadRequest(format!("script {id} has no subscription to schedule"))
            }
            reactor_cron::CronError::Store(e) => ApiError::from(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn not_found_maps_to_404() {
        let response = ApiError::NotFound("missing".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn bad_request_maps_to_400() {
        let response = ApiError::BadRequest("bad".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn store_not_found_converts_to_api_not_found() {
        let err: ApiError = reactor_store::StoreError::NotFound(uuid::Uuid::nil()).into();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
