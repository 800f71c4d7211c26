use axum::{Json, Router, extract::State, routing::post};
use http::StatusCode;
use serde::Deserialize;
use uuid::Uuid;

use crate::http::routing::AppState;
use crate::{domain::{store::TaskStore, task::OwnerId}, http::types::ApiError};

pub fn router<S: TaskStore>(state: AppState<S>) -> Router {
    Router::new()
        .route("/session", post(sign_in::<S>).delete(sign_out::<S>))
        .with_state(state)
}

/// The identity service has already authenticated this user.
#[derive(Deserialize)]
struct SignInBody { user_id: Uuid }

async fn sign_in<S: TaskStore>(State(state): State<AppState<S>>, Json(body): Json<SignInBody>) -> Result<Json<serde_json::Value>, ApiError> {
    let owner = OwnerId(body.user_id);
    state.sync.initialize(owner).await?;
    let snapshot = state.sync.snapshot();
    Ok(Json(serde_json::json!({ "user_id": owner, "active": snapshot.active.len(), "deleted": snapshot.deleted.len() })))
}

async fn sign_out<S: TaskStore>(State(state): State<AppState<S>>) -> StatusCode {
    state.sync.sign_out().await;
    StatusCode::NO_CONTENT
}
