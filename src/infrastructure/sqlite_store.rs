use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, SubsecRound, Utc};
use sqlx::{Pool, QueryBuilder, Row, Sqlite, sqlite::{SqlitePoolOptions, SqliteRow}};
use uuid::Uuid;

use crate::domain::{
    change::{ChangeEvent, ChangeFeed, Subscription},
    store::{StoreError, TaskStore},
    task::{NewTask, OwnerId, Priority, Task, TaskId, TaskPatch},
};

const COLUMNS: &str = "id, user_id, title, description, due_date, priority, completed, created_at, updated_at, deleted_at, deleted_by";

/// SQLite-backed tasks relation. Every successful write is published on the
/// store's change feed, whichever handle performed it.
#[derive(Clone)]
pub struct SqliteTaskStore {
    pool: Arc<Pool<Sqlite>>,
    feed: ChangeFeed,
}

impl SqliteTaskStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = if database_url.contains(":memory:") {
            // Each connection would get its own private in-memory database.
            SqlitePoolOptions::new().max_connections(1).idle_timeout(None::<Duration>).max_lifetime(None::<Duration>)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = options.connect(database_url).await?;
        Ok(Self { pool: Arc::new(pool), feed: ChangeFeed::new() })
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                due_date TEXT,
                priority TEXT NOT NULL DEFAULT 'medium',
                completed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT,
                deleted_by TEXT
            )",
        )
        .execute(&*self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS tasks_user_deleted ON tasks (user_id, deleted_at)")
            .execute(&*self.pool)
            .await?;
        Ok(())
    }

    async fn list_active(&self, owner: OwnerId) -> Result<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM tasks WHERE user_id = ?1 AND deleted_at IS NULL ORDER BY created_at DESC, rowid DESC"
        ))
        .bind(owner.0.to_string())
        .fetch_all(&*self.pool)
        .await?;
        rows.into_iter().map(row_to_task).collect()
    }

    async fn list_deleted(&self, owner: OwnerId, cutoff: DateTime<Utc>) -> Result<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM tasks
             WHERE user_id = ?1 AND deleted_at IS NOT NULL AND deleted_at >= ?2
             ORDER BY deleted_at DESC, rowid DESC"
        ))
        .bind(owner.0.to_string())
        .bind(timestamp(cutoff))
        .fetch_all(&*self.pool)
        .await?;
        rows.into_iter().map(row_to_task).collect()
    }

    async fn insert(&self, owner: OwnerId, input: NewTask) -> Result<Task> {
        let now = server_now();
        let task = Task {
            id: TaskId(Uuid::new_v4()),
            user_id: owner,
            title: input.title,
            description: input.description.unwrap_or_default(),
            due_date: input.due_date,
            priority: input.priority.unwrap_or_default(),
            completed: input.completed.unwrap_or(false),
            created_at: now,
            updated_at: now,
            deleted_at: None,
            deleted_by: None,
        };
        sqlx::query(&format!(
            "INSERT INTO tasks ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL, NULL)"
        ))
        .bind(task.id.0.to_string())
        .bind(owner.0.to_string())
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.due_date.map(|d| d.to_string()))
        .bind(task.priority.as_str())
        .bind(task.completed)
        .bind(timestamp(now))
        .bind(timestamp(now))
        .execute(&*self.pool)
        .await?;

        self.feed.publish(ChangeEvent::insert(task.clone()));
        Ok(task)
    }

    async fn update(&self, id: TaskId, patch: TaskPatch) -> Result<Task> {
        // Single statement; only the supplied columns are written.
        let mut query = QueryBuilder::<Sqlite>::new("UPDATE tasks SET updated_at = ");
        query.push_bind(timestamp(server_now()));
        if let Some(title) = patch.title { query.push(", title = ").push_bind(title); }
        if let Some(description) = patch.description { query.push(", description = ").push_bind(description); }
        if let Some(due_date) = patch.due_date { query.push(", due_date = ").push_bind(due_date.map(|d| d.to_string())); }
        if let Some(priority) = patch.priority { query.push(", priority = ").push_bind(priority.as_str()); }
        if let Some(completed) = patch.completed { query.push(", completed = ").push_bind(completed); }
        if let Some(deleted_at) = patch.deleted_at { query.push(", deleted_at = ").push_bind(deleted_at.map(timestamp)); }
        if let Some(deleted_by) = patch.deleted_by { query.push(", deleted_by = ").push_bind(deleted_by.map(|o| o.0.to_string())); }
        query.push(" WHERE id = ").push_bind(id.0.to_string());
        query.push(format!(" RETURNING {COLUMNS}"));

        let row = query.build().fetch_optional(&*self.pool).await?;
        let task = row.map(row_to_task).transpose()?.ok_or(StoreError::NotFound(id))?;

        self.feed.publish(ChangeEvent::update(None, task.clone()));
        Ok(task)
    }

    async fn delete(&self, id: TaskId) -> Result<()> {
        let row = sqlx::query(&format!("DELETE FROM tasks WHERE id = ?1 RETURNING {COLUMNS}"))
            .bind(id.0.to_string())
            .fetch_optional(&*self.pool)
            .await?;
        let old = row.map(row_to_task).transpose()?.ok_or(StoreError::NotFound(id))?;

        self.feed.publish(ChangeEvent::delete(old));
        Ok(())
    }

    async fn subscribe(&self, owner: OwnerId) -> Result<Subscription> {
        Ok(self.feed.subscribe(owner))
    }
}

// Truncated to what the column keeps, so a returned row equals its stored form.
fn server_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

// Fixed-width UTC so lexicographic order in SQL matches time order.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s).with_context(|| format!("bad timestamp {s:?}"))?.with_timezone(&Utc))
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).with_context(|| format!("bad uuid {s:?}"))
}

fn row_to_task(row: SqliteRow) -> Result<Task> {
    let id: String = row.try_get("id")?;
    let user_id: String = row.try_get("user_id")?;
    let due_date: Option<String> = row.try_get("due_date")?;
    let priority: String = row.try_get("priority")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let deleted_at: Option<String> = row.try_get("deleted_at")?;
    let deleted_by: Option<String> = row.try_get("deleted_by")?;

    Ok(Task {
        id: TaskId(parse_uuid(&id)?),
        user_id: OwnerId(parse_uuid(&user_id)?),
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        due_date: due_date
            .map(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").with_context(|| format!("bad due date {d:?}")))
            .transpose()?,
        priority: Priority::parse(&priority).unwrap_or_default(),
        completed: row.try_get("completed")?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
        deleted_at: deleted_at.as_deref().map(parse_timestamp).transpose()?,
        deleted_by: deleted_by.as_deref().map(|s| parse_uuid(s).map(OwnerId)).transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{change::ChangeKind, task::retention_cutoff};
    use chrono::TimeDelta;

    async fn store() -> SqliteTaskStore {
        let store = SqliteTaskStore::connect("sqlite::memory:").await.unwrap();
        store.init().await.unwrap();
        store
    }

    #[tokio::test]
    async fn insert_assigns_server_fields() {
        let store = store().await;
        let owner = OwnerId(Uuid::new_v4());
        let task = store
            .insert(owner, NewTask { priority: Some(Priority::High), ..NewTask::titled("Buy milk") })
            .await
            .unwrap();
        assert!(!task.id.0.is_nil());
        assert!(!task.completed);
        assert_eq!(task.deleted_at, None);
        assert_eq!(task.priority, Priority::High);
        assert_eq!(task.user_id, owner);
        assert_eq!(store.list_active(owner).await.unwrap(), vec![task]);
    }

    #[tokio::test]
    async fn active_listing_is_owner_scoped_and_newest_first() {
        let store = store().await;
        let owner = OwnerId(Uuid::new_v4());
        let first = store.insert(owner, NewTask::titled("first")).await.unwrap();
        let second = store.insert(owner, NewTask::titled("second")).await.unwrap();
        store.insert(OwnerId(Uuid::new_v4()), NewTask::titled("foreign")).await.unwrap();
        let gone = store.insert(owner, NewTask::titled("gone")).await.unwrap();
        store.update(gone.id, TaskPatch::soft_delete(Utc::now(), owner)).await.unwrap();

        let ids: Vec<_> = store.list_active(owner).await.unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn deleted_listing_respects_retention_boundary() {
        let store = store().await;
        let owner = OwnerId(Uuid::new_v4());
        let now = Utc::now();
        let inside = store.insert(owner, NewTask::titled("inside")).await.unwrap();
        let outside = store.insert(owner, NewTask::titled("outside")).await.unwrap();
        let inside_at = now - TimeDelta::days(30) + TimeDelta::seconds(1);
        let outside_at = now - TimeDelta::days(30) - TimeDelta::seconds(1);
        store.update(inside.id, TaskPatch::soft_delete(inside_at, owner)).await.unwrap();
        store.update(outside.id, TaskPatch::soft_delete(outside_at, owner)).await.unwrap();

        let listed = store.list_deleted(owner, retention_cutoff(now)).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, inside.id);
        assert_eq!(listed[0].deleted_by, Some(owner));
    }

    #[tokio::test]
    async fn writes_are_published_on_the_feed() {
        let store = store().await;
        let owner = OwnerId(Uuid::new_v4());
        let mut sub = store.subscribe(owner).await.unwrap();

        let task = store.insert(owner, NewTask::titled("x")).await.unwrap();
        store.update(task.id, TaskPatch::completed(true)).await.unwrap();
        store.delete(task.id).await.unwrap();

        assert_eq!(sub.recv().await.unwrap().kind, ChangeKind::Insert);
        let update = sub.recv().await.unwrap();
        assert_eq!(update.kind, ChangeKind::Update);
        assert!(update.new.unwrap().completed);
        let delete = sub.recv().await.unwrap();
        assert_eq!(delete.kind, ChangeKind::Delete);
        assert_eq!(delete.old.unwrap().id, task.id);
    }

    #[tokio::test]
    async fn concurrent_patches_to_one_row_both_land() {
        let store = store().await;
        let owner = OwnerId(Uuid::new_v4());
        let task = store.insert(owner, NewTask::titled("orig")).await.unwrap();

        let rename = TaskPatch { title: Some("renamed".into()), ..TaskPatch::default() };
        let (renamed, completed) = tokio::join!(store.update(task.id, rename), store.update(task.id, TaskPatch::completed(true)));
        renamed.unwrap();
        completed.unwrap();

        let stored = store.list_active(owner).await.unwrap().remove(0);
        assert_eq!(stored.title, "renamed");
        assert!(stored.completed);
        assert_eq!(stored.created_at, task.created_at);
    }

    #[tokio::test]
    async fn update_returns_the_stored_row() {
        let store = store().await;
        let owner = OwnerId(Uuid::new_v4());
        let task = store.insert(owner, NewTask::titled("x")).await.unwrap();
        let patch = TaskPatch { due_date: Some(NaiveDate::from_ymd_opt(2030, 1, 1)), priority: Some(Priority::Low), ..TaskPatch::default() };
        let updated = store.update(task.id, patch).await.unwrap();
        assert_eq!(updated.title, "x");
        assert!(updated.updated_at >= task.updated_at);
        assert_eq!(store.list_active(owner).await.unwrap(), vec![updated.clone()]);

        let cleared = store.update(task.id, TaskPatch { due_date: Some(None), ..TaskPatch::default() }).await.unwrap();
        assert_eq!(cleared.due_date, None);
        assert_eq!(cleared.priority, Priority::Low);
    }

    #[tokio::test]
    async fn missing_rows_are_not_found() {
        let store = store().await;
        let mut sub = store.subscribe(OwnerId(Uuid::new_v4())).await.unwrap();
        let id = TaskId::default();

        let err = store.update(id, TaskPatch::completed(true)).await.unwrap_err();
        assert_eq!(err.downcast_ref::<StoreError>(), Some(&StoreError::NotFound(id)));
        let err = store.delete(id).await.unwrap_err();
        assert_eq!(err.downcast_ref::<StoreError>(), Some(&StoreError::NotFound(id)));

        // Nothing was written, so nothing was published.
        store.feed.publish(ChangeEvent::unknown());
        assert_eq!(sub.recv().await.unwrap().kind, ChangeKind::Unknown);
    }
}
