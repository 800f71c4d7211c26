use axum::{Router, routing::get};

use crate::{application::task_sync::TaskSync, domain::store::TaskStore, http::routes::{session, tasks}};

pub struct AppState<S: TaskStore> { pub sync: TaskSync<S> }

impl<S: TaskStore> Clone for AppState<S> {
    fn clone(&self) -> Self { Self { sync: self.sync.clone() } }
}

pub fn app<S: TaskStore>(state: AppState<S>) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(session::router(state.clone()))
        .merge(tasks::router(state))
}
