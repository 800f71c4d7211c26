use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, patch, post},
};
use chrono::{DateTime, Utc};
use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::http::routing::AppState;
use crate::{
    application::view::{TaskQuery, TaskStats},
    domain::{
        store::TaskStore,
        task::{NewTask, Task, TaskId, TaskPatch},
    },
    http::types::ApiError,
};

pub fn router<S: TaskStore>(state: AppState<S>) -> Router {
    Router::new()
        .route("/tasks", get(list_tasks::<S>).post(create_task::<S>))
        .route("/tasks/stats", get(stats::<S>))
        .route("/tasks/deleted", get(list_deleted::<S>))
        .route("/tasks/refetch", post(refetch::<S>))
        .route("/tasks/:id", patch(update_task::<S>).delete(permanently_delete::<S>))
        .route("/tasks/:id/toggle", post(toggle_task::<S>))
        .route("/tasks/:id/delete", post(soft_delete::<S>))
        .route("/tasks/:id/restore", post(restore_task::<S>))
        .with_state(state)
}

async fn list_tasks<S: TaskStore>(State(state): State<AppState<S>>, Query(query): Query<TaskQuery>) -> Result<Json<serde_json::Value>, ApiError> {
    require_session(&state)?;
    let snapshot = state.sync.snapshot();
    let items = query.apply(&snapshot.active, today());
    Ok(Json(serde_json::json!({ "items": items, "loading": snapshot.loading, "error": snapshot.error })))
}

async fn stats<S: TaskStore>(State(state): State<AppState<S>>) -> Result<Json<TaskStats>, ApiError> {
    require_session(&state)?;
    Ok(Json(TaskStats::compute(&state.sync.tasks(), today())))
}

#[derive(Serialize)]
struct DeletedItem<'a> {
    #[serde(flatten)]
    task: &'a Task,
    purge_at: Option<DateTime<Utc>>,
}

async fn list_deleted<S: TaskStore>(State(state): State<AppState<S>>) -> Result<Json<serde_json::Value>, ApiError> {
    require_session(&state)?;
    let deleted = state.sync.deleted_tasks();
    let items: Vec<_> = deleted.iter().map(|task| DeletedItem { task, purge_at: task.purge_at() }).collect();
    Ok(Json(serde_json::json!({ "items": items })))
}

async fn refetch<S: TaskStore>(State(state): State<AppState<S>>) -> Result<StatusCode, ApiError> {
    state.sync.refetch().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_task<S: TaskStore>(State(state): State<AppState<S>>, Json(payload): Json<NewTask>) -> Result<Json<Task>, ApiError> {
    if payload.title.trim().is_empty() {
        return Err(ApiError::bad_request("title must not be empty"));
    }
    Ok(Json(state.sync.create_task(payload).await?))
}

async fn update_task<S: TaskStore>(State(state): State<AppState<S>>, Path(id): Path<String>, Json(payload): Json<TaskPatch>) -> Result<Json<Task>, ApiError> {
    let id = parse_id(&id)?;
    if payload.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(ApiError::bad_request("title must not be empty"));
    }
    Ok(Json(state.sync.update_task(id, payload).await?))
}

#[derive(Deserialize)]
struct ToggleBody { completed: bool }

async fn toggle_task<S: TaskStore>(State(state): State<AppState<S>>, Path(id): Path<String>, Json(body): Json<ToggleBody>) -> Result<Json<Task>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.sync.toggle_completion(id, body.completed).await?))
}

async fn soft_delete<S: TaskStore>(State(state): State<AppState<S>>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    state.sync.soft_delete(parse_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn restore_task<S: TaskStore>(State(state): State<AppState<S>>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    state.sync.restore(parse_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn permanently_delete<S: TaskStore>(State(state): State<AppState<S>>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    state.sync.permanently_delete(parse_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn require_session<S: TaskStore>(state: &AppState<S>) -> Result<(), ApiError> {
    state.sync.owner().map(|_| ()).ok_or_else(|| crate::application::task_sync::SyncError::NotAuthenticated.into())
}

fn parse_id(s: &str) -> Result<TaskId, ApiError> { uuid::Uuid::parse_str(s).map(TaskId).map_err(|_| ApiError::bad_request("invalid id")) }

fn today() -> chrono::NaiveDate { Utc::now().date_naive() }
