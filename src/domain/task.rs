use std::fmt;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Days a soft-deleted task stays recoverable.
pub const RETENTION_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl Default for TaskId {
    fn default() -> Self { Self(Uuid::new_v4()) }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.0.fmt(f) }
}

/// Identifier of the signed-in user owning a task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct OwnerId(pub Uuid);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.0.fmt(f) }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: TaskId,
    pub user_id: OwnerId,
    pub title: String,
    pub description: String,
    pub due_date: Option<NaiveDate>,
    pub priority: Priority,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<OwnerId>,
}

impl Task {
    /// True when the task sits in the recovery bin as of `now`.
    pub fn is_recoverable(&self, now: DateTime<Utc>) -> bool {
        self.deleted_at.is_some_and(|at| at >= retention_cutoff(now))
    }

    /// When a soft-deleted task leaves the recovery bin.
    pub fn purge_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at.map(|at| at + TimeDelta::days(RETENTION_DAYS))
    }
}

/// Oldest `deleted_at` still shown in the recovery bin.
pub fn retention_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - TimeDelta::days(RETENTION_DAYS)
}

/// Insert payload. The store assigns id, owner and timestamps.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub completed: Option<bool>,
}

impl NewTask {
    pub fn titled(title: impl Into<String>) -> Self {
        Self { title: title.into(), ..Self::default() }
    }
}

/// Partial update. Nullable columns are tri-state: `None` leaves the column
/// alone, `Some(None)` clears it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub due_date: Option<Option<NaiveDate>>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub completed: Option<bool>,
    #[serde(default, deserialize_with = "nullable")]
    pub deleted_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "nullable")]
    pub deleted_by: Option<Option<OwnerId>>,
}

impl TaskPatch {
    pub fn completed(completed: bool) -> Self {
        Self { completed: Some(completed), ..Self::default() }
    }

    pub fn soft_delete(at: DateTime<Utc>, by: OwnerId) -> Self {
        Self { deleted_at: Some(Some(at)), deleted_by: Some(Some(by)), ..Self::default() }
    }

    pub fn restore() -> Self {
        Self { deleted_at: Some(None), deleted_by: Some(None), ..Self::default() }
    }

    /// Content-only view of the patch; lifecycle columns are dropped.
    pub fn content_only(self) -> Self {
        Self { deleted_at: None, deleted_by: None, ..self }
    }

    /// Applies the patch in place. Timestamps are left to the caller.
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(t) = &self.title { task.title = t.clone(); }
        if let Some(d) = &self.description { task.description = d.clone(); }
        if let Some(d) = self.due_date { task.due_date = d; }
        if let Some(p) = self.priority { task.priority = p; }
        if let Some(c) = self.completed { task.completed = c; }
        if let Some(d) = self.deleted_at { task.deleted_at = d; }
        if let Some(b) = self.deleted_by { task.deleted_by = b; }
    }
}

// A present key always yields `Some`, so an explicit `null` becomes `Some(None)`.
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
