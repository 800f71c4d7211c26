use std::sync::{Arc, Weak};

use chrono::Utc;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::merge::{contains_id, insert_front_if_absent, remove_by_id, replace_unless_stale, take_by_id, upsert_front};
use crate::domain::{
    change::{ChangeEvent, ChangeKind, Subscription},
    store::{StoreError, TaskStore},
    task::{NewTask, OwnerId, Task, TaskId, TaskPatch, retention_cutoff},
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("User not authenticated")]
    NotAuthenticated,
    #[error("task {0} not found")]
    NotFound(TaskId),
    #[error("{0}")]
    Remote(String),
}

impl From<anyhow::Error> for SyncError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<StoreError>() {
            Some(StoreError::NotFound(id)) => SyncError::NotFound(*id),
            None => SyncError::Remote(format!("{err:#}")),
        }
    }
}

/// Point-in-time copy of everything the engine exposes for reading.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncSnapshot {
    pub active: Vec<Task>,
    pub deleted: Vec<Task>,
    pub loading: bool,
    pub error: Option<String>,
}

struct Session {
    owner: OwnerId,
    listener: Option<JoinHandle<()>>,
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

#[derive(Default)]
struct State {
    view: SyncSnapshot,
    session: Option<Session>,
    // Bumped on every sign-in and sign-out; results tagged with an older
    // epoch belong to a finished session and are discarded.
    epoch: u64,
}

impl State {
    fn holds(&self, id: TaskId) -> bool {
        contains_id(&self.view.active, id) || contains_id(&self.view.deleted, id)
    }

    fn replace_active(&mut self, tasks: Vec<Task>) {
        self.view.deleted.retain(|d| !contains_id(&tasks, d.id));
        self.view.active = tasks;
    }

    fn replace_deleted(&mut self, tasks: Vec<Task>) {
        self.view.active.retain(|a| !contains_id(&tasks, a.id));
        self.view.deleted = tasks;
    }
}

struct Inner<S> {
    store: S,
    state: Mutex<State>,
}

/// Keeps the signed-in owner's active and recently deleted tasks in memory,
/// in step with the store and its change feed.
///
/// Every state change is a closure over the latest state applied under a
/// short lock, so an operation resuming after an await composes with
/// whatever the change feed applied in between.
pub struct TaskSync<S: TaskStore> {
    inner: Arc<Inner<S>>,
}

impl<S: TaskStore> Clone for TaskSync<S> {
    fn clone(&self) -> Self { Self { inner: self.inner.clone() } }
}

impl<S: TaskStore> TaskSync<S> {
    pub fn new(store: S) -> Self {
        Self { inner: Arc::new(Inner { store, state: Mutex::new(State::default()) }) }
    }

    pub fn store(&self) -> &S { &self.inner.store }

    pub fn tasks(&self) -> Vec<Task> { self.inner.state.lock().view.active.clone() }

    pub fn deleted_tasks(&self) -> Vec<Task> { self.inner.state.lock().view.deleted.clone() }

    pub fn loading(&self) -> bool { self.inner.state.lock().view.loading }

    pub fn error(&self) -> Option<String> { self.inner.state.lock().view.error.clone() }

    pub fn owner(&self) -> Option<OwnerId> { self.inner.state.lock().session.as_ref().map(|s| s.owner) }

    pub fn snapshot(&self) -> SyncSnapshot { self.inner.state.lock().view.clone() }

    /// Starts a session for `owner`: loads both collections and opens the
    /// owner's change subscription. Any previous session is ended first.
    pub async fn initialize(&self, owner: OwnerId) -> Result<(), SyncError> {
        self.end_session().await;
        let epoch = {
            let mut state = self.inner.state.lock();
            state.epoch += 1;
            state.session = Some(Session { owner, listener: None });
            state.view = SyncSnapshot { loading: true, ..SyncSnapshot::default() };
            state.epoch
        };
        info!(%owner, "starting task session");

        // Subscribing before the queries means nothing committed in between
        // is missed; buffered events replay idempotently once loaded.
        let subscription = match self.inner.store.subscribe(owner).await {
            Ok(sub) => sub,
            Err(e) => {
                error!(%owner, error = %e, "failed to subscribe to task changes");
                let err = SyncError::from(e);
                self.mutate(epoch, |s| {
                    s.view.error = Some(err.to_string());
                    s.view.loading = false;
                });
                return Err(err);
            }
        };

        let loaded = self.load_both(owner).await;
        let result = match loaded {
            Ok((active, deleted)) => {
                debug!(active = active.len(), deleted = deleted.len(), "loaded tasks");
                self.mutate(epoch, |s| {
                    s.view.active = active;
                    s.view.deleted = deleted;
                    s.view.loading = false;
                });
                Ok(())
            }
            Err(err) => {
                error!(%owner, error = %err, "failed to load tasks");
                self.mutate(epoch, |s| {
                    s.view.error = Some(err.to_string());
                    s.view.loading = false;
                });
                Err(err)
            }
        };

        let listener = spawn_listener(Arc::downgrade(&self.inner), subscription, epoch);
        let mut state = self.inner.state.lock();
        let current = state.epoch == epoch;
        match state.session.as_mut() {
            Some(session) if current => session.listener = Some(listener),
            _ => listener.abort(),
        }
        result
    }

    /// Ends the session, releasing its subscription before returning.
    pub async fn sign_out(&self) {
        if let Some(owner) = self.owner() {
            info!(%owner, "ending task session");
        }
        self.end_session().await;
    }

    async fn end_session(&self) {
        let listener = {
            let mut state = self.inner.state.lock();
            let Some(mut session) = state.session.take() else { return };
            state.epoch += 1;
            state.view = SyncSnapshot::default();
            session.listener.take()
        };
        if let Some(listener) = listener {
            listener.abort();
            let _ = listener.await;
        }
    }

    pub async fn create_task(&self, input: NewTask) -> Result<Task, SyncError> {
        let (owner, epoch) = self.signed_in()?;
        debug!(%owner, title = %input.title, "creating task");
        match self.inner.store.insert(owner, input).await {
            Ok(task) => {
                // The feed may already have delivered this insert.
                self.mutate(epoch, |s| {
                    if !s.holds(task.id) {
                        s.view.active.insert(0, task.clone());
                    }
                });
                info!(id = %task.id, "task created");
                Ok(task)
            }
            Err(e) => {
                error!(error = %e, "failed to create task");
                Err(e.into())
            }
        }
    }

    /// Sends the content fields of `patch` and applies the returned row once
    /// confirmed. Lifecycle columns go through `soft_delete`/`restore` only.
    pub async fn update_task(&self, id: TaskId, patch: TaskPatch) -> Result<Task, SyncError> {
        let (_, epoch) = self.signed_in()?;
        debug!(%id, ?patch, "updating task");
        match self.inner.store.update(id, patch.content_only()).await {
            Ok(task) => {
                self.mutate(epoch, |s| {
                    replace_unless_stale(&mut s.view.active, task.clone());
                });
                Ok(task)
            }
            Err(e) => {
                error!(%id, error = %e, "failed to update task");
                Err(e.into())
            }
        }
    }

    pub async fn toggle_completion(&self, id: TaskId, completed: bool) -> Result<Task, SyncError> {
        debug!(%id, completed, "toggling completion");
        self.update_task(id, TaskPatch::completed(completed)).await
    }

    /// Moves the task into the recovery bin right away, then persists it.
    /// A failed request is repaired by refetching both collections.
    pub async fn soft_delete(&self, id: TaskId) -> Result<(), SyncError> {
        let (owner, epoch) = self.signed_in()?;
        let now = Utc::now();
        self.mutate(epoch, |s| {
            if let Some(task) = take_by_id(&mut s.view.active, id) {
                upsert_front(&mut s.view.deleted, Task { deleted_at: Some(now), deleted_by: Some(owner), ..task });
            }
        });

        match self.inner.store.update(id, TaskPatch::soft_delete(now, owner)).await {
            Ok(_) => {
                info!(%id, "task moved to recovery bin");
                Ok(())
            }
            Err(e) => {
                error!(%id, error = %e, "failed to delete task; resyncing");
                self.resync(owner, epoch).await;
                Err(e.into())
            }
        }
    }

    pub async fn restore(&self, id: TaskId) -> Result<(), SyncError> {
        let (owner, epoch) = self.signed_in()?;
        self.mutate(epoch, |s| {
            if let Some(task) = take_by_id(&mut s.view.deleted, id) {
                upsert_front(&mut s.view.active, Task { deleted_at: None, deleted_by: None, ..task });
            }
        });

        match self.inner.store.update(id, TaskPatch::restore()).await {
            Ok(_) => {
                info!(%id, "task restored");
                Ok(())
            }
            Err(e) => {
                error!(%id, error = %e, "failed to restore task; resyncing");
                self.resync(owner, epoch).await;
                Err(e.into())
            }
        }
    }

    pub async fn permanently_delete(&self, id: TaskId) -> Result<(), SyncError> {
        let (owner, epoch) = self.signed_in()?;
        self.mutate(epoch, |s| {
            remove_by_id(&mut s.view.deleted, id);
        });

        match self.inner.store.delete(id).await {
            Ok(()) => {
                info!(%id, "task permanently deleted");
                Ok(())
            }
            Err(e) => {
                error!(%id, error = %e, "failed to permanently delete task; refetching recovery bin");
                let _ = self.fetch_deleted(owner, epoch).await;
                Err(e.into())
            }
        }
    }

    /// Reloads both collections from the store.
    pub async fn refetch(&self) -> Result<(), SyncError> {
        let (owner, epoch) = self.signed_in()?;
        self.fetch_active(owner, epoch).await?;
        self.fetch_deleted(owner, epoch).await
    }

    /// Merges one change-feed event into the current session's state.
    pub async fn apply_change(&self, event: ChangeEvent) {
        let Ok((owner, epoch)) = self.signed_in() else {
            debug!("change event without a session; ignored");
            return;
        };
        if event.owner().is_some_and(|o| o != owner) {
            warn!(%owner, "change event for another owner; ignored");
            return;
        }
        self.handle_change(owner, epoch, event).await;
    }

    async fn handle_change(&self, owner: OwnerId, epoch: u64, event: ChangeEvent) {
        debug!(kind = ?event.kind, "change event received");
        match (event.kind, event.new, event.old) {
            (ChangeKind::Insert, Some(row), _) => {
                self.mutate(epoch, |s| {
                    if !s.holds(row.id) {
                        insert_front_if_absent(&mut s.view.active, row);
                    }
                });
            }
            (ChangeKind::Update, Some(row), _) => {
                let id = row.id;
                let mut found = false;
                self.mutate(epoch, |s| found = replace_unless_stale(&mut s.view.active, row));
                if !found {
                    // Not re-routed into the recovery bin; the next refetch picks it up.
                    debug!(%id, "update for task outside the active collection; ignored");
                }
            }
            (ChangeKind::Delete, new, old) => match old.or(new) {
                Some(row) => {
                    self.mutate(epoch, |s| {
                        remove_by_id(&mut s.view.active, row.id);
                    });
                }
                None => self.recover(owner, epoch).await,
            },
            _ => self.recover(owner, epoch).await,
        }
    }

    async fn recover(&self, owner: OwnerId, epoch: u64) {
        warn!("unrecognized change event; refetching active tasks");
        let _ = self.fetch_active(owner, epoch).await;
    }

    async fn resync(&self, owner: OwnerId, epoch: u64) {
        let _ = self.fetch_active(owner, epoch).await;
        let _ = self.fetch_deleted(owner, epoch).await;
    }

    async fn load_both(&self, owner: OwnerId) -> Result<(Vec<Task>, Vec<Task>), SyncError> {
        let active = self.inner.store.list_active(owner).await?;
        let deleted = self.inner.store.list_deleted(owner, retention_cutoff(Utc::now())).await?;
        Ok((active, deleted))
    }

    async fn fetch_active(&self, owner: OwnerId, epoch: u64) -> Result<(), SyncError> {
        self.mutate(epoch, |s| s.view.loading = true);
        match self.inner.store.list_active(owner).await {
            Ok(tasks) => {
                debug!(count = tasks.len(), "fetched active tasks");
                self.mutate(epoch, |s| {
                    s.replace_active(tasks);
                    s.view.error = None;
                    s.view.loading = false;
                });
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "failed to fetch active tasks");
                let err = SyncError::from(e);
                self.mutate(epoch, |s| {
                    s.view.error = Some(err.to_string());
                    s.view.loading = false;
                });
                Err(err)
            }
        }
    }

    async fn fetch_deleted(&self, owner: OwnerId, epoch: u64) -> Result<(), SyncError> {
        match self.inner.store.list_deleted(owner, retention_cutoff(Utc::now())).await {
            Ok(tasks) => {
                debug!(count = tasks.len(), "fetched deleted tasks");
                self.mutate(epoch, |s| s.replace_deleted(tasks));
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "failed to fetch deleted tasks");
                Err(e.into())
            }
        }
    }

    fn signed_in(&self) -> Result<(OwnerId, u64), SyncError> {
        let state = self.inner.state.lock();
        state.session.as_ref().map(|s| (s.owner, state.epoch)).ok_or(SyncError::NotAuthenticated)
    }

    fn mutate(&self, epoch: u64, f: impl FnOnce(&mut State)) {
        let mut state = self.inner.state.lock();
        if state.epoch != epoch {
            debug!(epoch, current = state.epoch, "dropping result from an ended session");
            return;
        }
        f(&mut state);
    }
}

fn spawn_listener<S: TaskStore>(inner: Weak<Inner<S>>, mut subscription: Subscription, epoch: u64) -> JoinHandle<()> {
    let owner = subscription.owner();
    tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            let Some(inner) = inner.upgrade() else { break };
            TaskSync { inner }.handle_change(owner, epoch, event).await;
        }
        subscription.unsubscribe();
    })
}
