use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::change::Subscription;
use super::task::{NewTask, OwnerId, Task, TaskId, TaskPatch};

/// Failures the store reports in a form callers can act on. Everything else
/// travels as a plain `anyhow::Error`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("task {0} not found")]
    NotFound(TaskId),
}

/// Remote relational store holding the `tasks` relation, plus its change feed.
#[async_trait]
pub trait TaskStore: Send + Sync + 'static {
    async fn init(&self) -> anyhow::Result<()>;
    /// Non-deleted tasks of `owner`, newest `created_at` first.
    async fn list_active(&self, owner: OwnerId) -> anyhow::Result<Vec<Task>>;
    /// Tasks of `owner` with `deleted_at >= cutoff`, newest `deleted_at` first.
    async fn list_deleted(&self, owner: OwnerId, cutoff: DateTime<Utc>) -> anyhow::Result<Vec<Task>>;
    async fn insert(&self, owner: OwnerId, input: NewTask) -> anyhow::Result<Task>;
    /// Writes only the supplied columns. A missing row is `StoreError::NotFound`.
    async fn update(&self, id: TaskId, patch: TaskPatch) -> anyhow::Result<Task>;
    async fn delete(&self, id: TaskId) -> anyhow::Result<()>;
    async fn subscribe(&self, owner: OwnerId) -> anyhow::Result<Subscription>;
}
