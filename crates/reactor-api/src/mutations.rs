//! Minimal stand-in for the (out-of-scope, §1) CRUD layer: spec.md §5 says
//! "a mutation arriving at the CRUD layer calls C9" — since no document
//! store is wired here, this module is the narrow seam that lets an
//! operator (or a test) hand the dispatcher a `Mutation` directly.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use std::sync::Arc;

use crate::state::ApiState;
use reactor_types::Mutation;

/// Accepts a `Mutation` and hands it to the reaction dispatcher. Returns as
/// soon as the dispatcher's load-and-filter pass is enqueued, before any
/// webhook/script outcome is known, per §5's decoupling rule.
pub async fn ingest_mutation(
    State(state): State<Arc<ApiState>>,
    Json(mutation): Json<Mutation>,
) -> impl IntoResponse {
    state.dispatch.trigger(mutation).await;
    StatusCode::ACCEPTED
}
