use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, Weak};

use tokio::sync::mpsc;
pub use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, warn};

use lobby_types::collections::{CHATS, MESSAGES, PARTICIPANTS};

use crate::error::StoreResult;
use crate::models::{Document, Snapshot};
use crate::query::Query;
use crate::store::Auth;
use crate::Database;

/// What a listener observes.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchTarget {
    Document { collection: String, id: String },
    Query(Query),
}

impl WatchTarget {
    pub fn document(collection: &str, id: &str) -> Self {
        Self::Document {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }

    pub fn collection(&self) -> &str {
        match self {
            Self::Document { collection, .. } => collection,
            Self::Query(q) => &q.collection,
        }
    }

    /// Whether a write to `written` can change what this target may see,
    /// either its contents or the rules guarding them.
    fn affected_by(&self, written: &str) -> bool {
        let watched = self.collection();
        watched == written
            || (written == CHATS && watched == MESSAGES)
            || (written == PARTICIPANTS && (watched == CHATS || watched == MESSAGES))
    }
}

type SnapshotSender = mpsc::UnboundedSender<StoreResult<Snapshot>>;

struct Registration {
    owner: u64,
    auth: Auth,
    target: WatchTarget,
    tx: SnapshotSender,
    last: Option<Vec<Document>>,
}

/// Active listeners, keyed by listener id.
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    entries: Mutex<HashMap<u64, Registration>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    fn remove(&self, id: u64) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(&id);
        }
    }

    /// Drops every registration opened by `owner`. Their receivers see the
    /// channel close.
    pub(crate) fn remove_owner(&self, owner: u64) -> usize {
        let Ok(mut entries) = self.entries.lock() else {
            return 0;
        };
        let before = entries.len();
        entries.retain(|_, reg| reg.owner != owner);
        before - entries.len()
    }
}

/// Receiving end of a registration. Dropping it (or calling [`cancel`])
/// unregisters synchronously: no snapshot is delivered afterwards.
///
/// [`cancel`]: Listener::cancel
pub struct Listener {
    id: u64,
    rx: mpsc::UnboundedReceiver<StoreResult<Snapshot>>,
    registry: Weak<ListenerRegistry>,
}

impl Listener {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next snapshot or error. `None` once the listener has been detached
    /// or has failed.
    pub async fn next(&mut self) -> Option<StoreResult<Snapshot>> {
        self.rx.recv().await
    }

    pub fn try_next(&mut self) -> Option<StoreResult<Snapshot>> {
        self.rx.try_recv().ok()
    }

    /// Like [`try_next`](Listener::try_next), but tells an empty queue apart
    /// from a detached listener.
    pub fn try_recv(&mut self) -> Result<StoreResult<Snapshot>, TryRecvError> {
        self.rx.try_recv()
    }

    pub fn cancel(self) {}
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.rx.close();
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl Database {
    /// Registers a listener and queues its initial snapshot.
    pub(crate) fn register(&self, owner: u64, auth: Auth, target: WatchTarget) -> Listener {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.listeners.next_id.fetch_add(1, Ordering::Relaxed);

        let listener = Listener {
            id,
            rx,
            registry: std::sync::Arc::downgrade(&self.listeners),
        };

        // Holding the registry lock across the first read keeps writes that
        // land meanwhile from slipping between snapshot and registration.
        let Ok(mut entries) = self.listeners.entries.lock() else {
            let _ = tx.send(Err(crate::StoreError::Unavailable(
                "listener registry poisoned".into(),
            )));
            return listener;
        };

        match self.read_target(&auth, &target) {
            Ok(docs) => {
                let _ = tx.send(Ok(Snapshot { docs: docs.clone() }));
                entries.insert(
                    id,
                    Registration {
                        owner,
                        auth,
                        target,
                        tx,
                        last: Some(docs),
                    },
                );
            }
            Err(e) => {
                debug!("Listener {} rejected: {}", id, e);
                let _ = tx.send(Err(e));
            }
        }

        listener
    }

    /// Re-evaluates listeners affected by a write to `collection` and sends
    /// a snapshot to those whose result changed.
    pub(crate) fn notify(&self, collection: &str) {
        let Ok(mut entries) = self.listeners.entries.lock() else {
            warn!("Listener registry poisoned, dropping notification");
            return;
        };

        let mut dead = Vec::new();
        for (id, reg) in entries.iter_mut() {
            if !reg.target.affected_by(collection) {
                continue;
            }
            if reg.tx.is_closed() {
                dead.push(*id);
                continue;
            }

            match self.read_target(&reg.auth, &reg.target) {
                Ok(docs) => {
                    if reg.last.as_ref() == Some(&docs) {
                        continue;
                    }
                    reg.last = Some(docs.clone());
                    if reg.tx.send(Ok(Snapshot { docs })).is_err() {
                        dead.push(*id);
                    }
                }
                Err(e) => {
                    // A failed listener stays failed; the caller re-subscribes.
                    debug!("Listener {} failed: {}", id, e);
                    let _ = reg.tx.send(Err(e));
                    dead.push(*id);
                }
            }
        }

        for id in dead {
            entries.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::store::DocumentStore;
    use crate::{FieldUpdate, default_indexes};

    fn data(v: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_initial_snapshot_then_updates() {
        let db = Arc::new(Database::open_in_memory(default_indexes()).unwrap());
        let alice = db.client(Auth::User("alice".into()));

        let mut listener = alice.listen(WatchTarget::document("users", "alice"));
        let first = listener.try_next().unwrap().unwrap();
        assert!(first.is_empty());

        alice
            .create("users", "alice", data(json!({ "displayName": "Alice" })))
            .unwrap();
        let second = listener.try_next().unwrap().unwrap();
        assert_eq!(second.first().unwrap().str_field("displayName"), Some("Alice"));
        assert!(listener.try_next().is_none());
    }

    #[test]
    fn test_no_delivery_after_cancel() {
        let db = Arc::new(Database::open_in_memory(default_indexes()).unwrap());
        let alice = db.client(Auth::User("alice".into()));

        let mut listener = alice.listen(WatchTarget::Query(Query::collection("users")));
        assert!(listener.try_next().is_some());
        assert_eq!(db.active_listeners(), 1);

        listener.cancel();
        assert_eq!(db.active_listeners(), 0);

        // Writing afterwards must not reach anything
        alice
            .create("users", "alice", data(json!({ "displayName": "Alice" })))
            .unwrap();
        assert_eq!(db.active_listeners(), 0);
    }

    #[test]
    fn test_unchanged_result_is_not_redelivered() {
        let db = Arc::new(Database::open_in_memory(default_indexes()).unwrap());
        let alice = db.client(Auth::User("alice".into()));
        alice
            .create(
                "chats",
                "c1",
                data(json!({ "type": "event", "eventId": "e1", "members": ["alice"] })),
            )
            .unwrap();

        let mut listener = alice.listen(WatchTarget::document("chats", "c1"));
        assert!(listener.try_next().is_some());

        alice
            .update("chats", "c1", vec![FieldUpdate::array_union("members", vec![json!("alice")])])
            .unwrap();
        assert!(listener.try_next().is_none());
    }

    #[test]
    fn test_detach_all_closes_owned_listeners() {
        let db = Arc::new(Database::open_in_memory(default_indexes()).unwrap());
        let alice = db.client(Auth::User("alice".into()));
        let bob = db.client(Auth::User("bob".into()));

        let _a = alice.listen(WatchTarget::Query(Query::collection("users")));
        let _b = bob.listen(WatchTarget::Query(Query::collection("users")));
        assert_eq!(db.active_listeners(), 2);

        alice.detach_all();
        assert_eq!(db.active_listeners(), 1);
    }

    #[tokio::test]
    async fn test_detached_listener_ends() {
        let db = Arc::new(Database::open_in_memory(default_indexes()).unwrap());
        let alice = db.client(Auth::User("alice".into()));

        let mut listener = alice.listen(WatchTarget::Query(Query::collection("users")));
        assert!(listener.next().await.unwrap().is_ok());
        alice.detach_all();
        assert!(listener.next().await.is_none());
    }
}
