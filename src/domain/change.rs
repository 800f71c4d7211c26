use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};

use super::task::{OwnerId, Task};

const FEED_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    #[serde(other)]
    Unknown,
}

/// One row mutation on the tasks relation, with the row images the store
/// has for it. Deletes carry only `old`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeEvent {
    #[serde(rename = "eventType")]
    pub kind: ChangeKind,
    pub new: Option<Task>,
    pub old: Option<Task>,
}

impl ChangeEvent {
    pub fn insert(row: Task) -> Self { Self { kind: ChangeKind::Insert, new: Some(row), old: None } }

    pub fn update(old: Option<Task>, row: Task) -> Self { Self { kind: ChangeKind::Update, new: Some(row), old } }

    pub fn delete(old: Task) -> Self { Self { kind: ChangeKind::Delete, new: None, old: Some(old) } }

    pub fn unknown() -> Self { Self { kind: ChangeKind::Unknown, new: None, old: None } }

    pub fn owner(&self) -> Option<OwnerId> {
        self.new.as_ref().or(self.old.as_ref()).map(|t| t.user_id)
    }
}

/// Publishing side of the change feed. Every subscriber sees every event and
/// filters by owner on its own side.
#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl Default for ChangeFeed {
    fn default() -> Self { Self::new() }
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(FEED_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: ChangeEvent) {
        // No live subscribers is not an error.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self, owner: OwnerId) -> Subscription {
        tracing::debug!(%owner, "change feed subscription opened");
        Subscription { owner, rx: self.tx.subscribe() }
    }

    pub fn subscriber_count(&self) -> usize { self.tx.receiver_count() }
}

/// Owner-filtered receiving side. Dropping it (or calling `unsubscribe`)
/// releases the channel.
pub struct Subscription {
    owner: OwnerId,
    rx: broadcast::Receiver<ChangeEvent>,
}

impl Subscription {
    pub fn owner(&self) -> OwnerId { self.owner }

    /// Next event for this owner, or `None` once the feed is gone. Missed
    /// events surface as a single `Unknown` event so the consumer resyncs.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.owner() == Some(self.owner) || event.kind == ChangeKind::Unknown => {
                    return Some(event);
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(owner = %self.owner, missed, "change feed lagged");
                    return Some(ChangeEvent::unknown());
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {
        tracing::debug!(owner = %self.owner, "change feed subscription released");
    }
}
