use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};
use tracing::debug;
use uuid::Uuid;

use quorum_types::events::SessionEvent;

/// Capacity of each per-session broadcast channel. A subscriber that lags
/// this far behind misses events and must re-request `session-update`.
const GROUP_CAPACITY: usize = 256;

/// Manages the per-session broadcast groups and fans out session events.
///
/// Holds only ephemeral transport state (which live connections are bound
/// to which session). The roster of record lives in the store; a rebinding
/// or reconnecting client recovers via the `session-update` snapshot.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// session_id -> broadcast group. Each group is its own serialization
    /// point: all subscribers observe that group's events in the same order.
    groups: RwLock<HashMap<Uuid, GroupEntry>>,
}

struct GroupEntry {
    tx: broadcast::Sender<SessionEvent>,
    subscribers: usize,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                groups: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Bind a connection to a session's group. The group is created on
    /// first bind. Callers must pair this with `leave_group`.
    pub async fn join_group(&self, session_id: Uuid) -> broadcast::Receiver<SessionEvent> {
        let mut groups = self.inner.groups.write().await;
        let entry = groups.entry(session_id).or_insert_with(|| {
            let (tx, _) = broadcast::channel(GROUP_CAPACITY);
            GroupEntry { tx, subscribers: 0 }
        });
        entry.subscribers += 1;
        entry.tx.subscribe()
    }

    /// Unbind a connection. The group is dropped with its last subscriber.
    pub async fn leave_group(&self, session_id: Uuid) {
        let mut groups = self.inner.groups.write().await;
        if let Some(entry) = groups.get_mut(&session_id) {
            entry.subscribers = entry.subscribers.saturating_sub(1);
            if entry.subscribers == 0 {
                groups.remove(&session_id);
                debug!("Dropped empty broadcast group for session {}", session_id);
            }
        }
    }

    /// Fan an event out to every connection bound to the session's group.
    /// An event for a session with no bound connections is dropped.
    pub async fn broadcast(&self, session_id: Uuid, event: SessionEvent) {
        let groups = self.inner.groups.read().await;
        if let Some(entry) = groups.get(&session_id) {
            let _ = entry.tx.send(event);
        }
    }

    /// Number of connections currently bound to a session's group.
    pub async fn group_size(&self, session_id: Uuid) -> usize {
        self.inner
            .groups
            .read()
            .await
            .get(&session_id)
            .map_or(0, |e| e.subscribers)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
