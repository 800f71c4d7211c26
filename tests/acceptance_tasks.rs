use std::time::Duration;

use axum::Router;
use axum::body::to_bytes;
use serde_json::{Value, json};
use tasksync::application::task_sync::TaskSync;
use tasksync::domain::store::TaskStore;
use tasksync::domain::task::{TaskId, TaskPatch};
use tasksync::http::routing::{self, AppState};
use tasksync::infrastructure::sqlite_store::SqliteTaskStore;

const USER: &str = "6f1c2a3e-8d4b-4c5a-9e7f-0a1b2c3d4e5f";

async fn setup() -> (Router, SqliteTaskStore) {
    // use in-memory sqlite for tests
    let store = SqliteTaskStore::connect("sqlite::memory:").await.unwrap();
    store.init().await.unwrap();
    let sync = TaskSync::new(store.clone());
    (routing::app(AppState { sync }), store)
}

#[tokio::test]
async fn acceptance_task_lifecycle() {
    let (app, _) = setup().await;

    let (status, _) = request(&app, "GET", "/tasks", None).await;
    assert_eq!(status, 401);

    let (status, body) = request(&app, "POST", "/session", Some(json!({ "user_id": USER }))).await;
    assert_eq!(status, 200);
    assert_eq!(body["active"], 0);

    // create
    let (status, body) = request(&app, "POST", "/tasks", Some(json!({ "title": "Buy milk", "priority": "high" }))).await;
    assert_eq!(status, 200);
    let id = body["id"].as_str().unwrap().to_string();
    assert_eq!(body["priority"], "high");
    assert_eq!(body["completed"], false);
    assert_eq!(body["deleted_at"], Value::Null);

    let (status, _) = request(&app, "POST", "/tasks", Some(json!({ "title": "  " }))).await;
    assert_eq!(status, 400);

    // update + toggle
    let (status, body) = request(&app, "PATCH", &format!("/tasks/{id}"), Some(json!({ "description": "2 litres", "due_date": "2030-01-01" }))).await;
    assert_eq!(status, 200);
    assert_eq!(body["due_date"], "2030-01-01");
    let (status, _) = request(&app, "POST", &format!("/tasks/{id}/toggle"), Some(json!({ "completed": true }))).await;
    assert_eq!(status, 200);

    let (_, body) = request(&app, "GET", "/tasks?view=active", None).await;
    assert_eq!(body["items"].as_array().unwrap().len(), 0);
    let (_, body) = request(&app, "GET", "/tasks?view=completed&q=LITRES", None).await;
    assert_eq!(body["items"][0]["id"], id.as_str());
    let (_, body) = request(&app, "GET", "/tasks/stats", None).await;
    assert_eq!(body["completed"], 1);
    assert_eq!(body["total"], 1);

    // soft delete, restore, delete again, purge
    let (status, _) = request(&app, "POST", &format!("/tasks/{id}/delete"), None).await;
    assert_eq!(status, 204);
    let (_, body) = request(&app, "GET", "/tasks/deleted", None).await;
    assert_eq!(body["items"][0]["id"], id.as_str());
    assert_eq!(body["items"][0]["deleted_by"], USER);
    assert!(body["items"][0]["purge_at"].is_string());

    let (status, _) = request(&app, "POST", &format!("/tasks/{id}/restore"), None).await;
    assert_eq!(status, 204);
    let (_, body) = request(&app, "GET", "/tasks?view=completed", None).await;
    assert_eq!(body["items"][0]["deleted_at"], Value::Null);

    request(&app, "POST", &format!("/tasks/{id}/delete"), None).await;
    let (status, _) = request(&app, "DELETE", &format!("/tasks/{id}"), None).await;
    assert_eq!(status, 204);
    let (_, body) = request(&app, "GET", "/tasks/deleted", None).await;
    assert_eq!(body["items"].as_array().unwrap().len(), 0);

    // purged rows are gone for good
    let (status, body) = request(&app, "DELETE", &format!("/tasks/{id}"), None).await;
    assert_eq!(status, 404);
    assert_eq!(body["message"], format!("task {id} not found"));
    let (status, _) = request(&app, "PATCH", &format!("/tasks/{id}"), Some(json!({ "title": "ghost" }))).await;
    assert_eq!(status, 404);

    let (status, _) = request(&app, "POST", "/tasks/not-a-uuid/delete", None).await;
    assert_eq!(status, 400);

    let (status, _) = request(&app, "DELETE", "/session", None).await;
    assert_eq!(status, 204);
    let (status, _) = request(&app, "POST", "/tasks", Some(json!({ "title": "late" }))).await;
    assert_eq!(status, 401);
}

#[tokio::test]
async fn acceptance_changes_from_other_clients_show_up() {
    let (app, store) = setup().await;
    request(&app, "POST", "/session", Some(json!({ "user_id": USER }))).await;
    let (_, body) = request(&app, "POST", "/tasks", Some(json!({ "title": "shared" }))).await;
    let id = TaskId(uuid::Uuid::parse_str(body["id"].as_str().unwrap()).unwrap());

    // Another process writes through the same store.
    store.update(id, TaskPatch { title: Some("renamed elsewhere".into()), ..TaskPatch::default() }).await.unwrap();

    let renamed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let (_, body) = request(&app, "GET", "/tasks", None).await;
            if body["items"][0]["title"] == "renamed elsewhere" { break; }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(renamed.is_ok());
}

async fn request(app: &Router, method: &str, path: &str, body: Option<Value>) -> (u16, Value) {
    use axum::body::Body;
    use axum::http::{Method, Request};
    use tower::ServiceExt;

    let req = Request::builder().method(Method::from_bytes(method.as_bytes()).unwrap()).uri(path);
    let req = match body {
        Some(json) => req.header("content-type", "application/json").body(Body::from(json.to_string())).unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };
    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status().as_u16();
    let bytes = to_bytes(res.into_body(), 1024 * 1024).await.unwrap();
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap_or(Value::Null) };
    (status, value)
}
