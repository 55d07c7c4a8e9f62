use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::listener::{Listener, WatchTarget};
use crate::models::{Document, FieldUpdate, Snapshot};
use crate::query::Query;
use crate::Database;

/// Identity a store client acts as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Auth {
    Anonymous,
    User(String),
    /// Trusted server-side access; skips the access rules.
    Admin,
}

impl Auth {
    pub fn uid(&self) -> Option<&str> {
        match self {
            Self::User(uid) => Some(uid),
            _ => None,
        }
    }
}

/// Document-store operations the engine is written against.
pub trait DocumentStore: Send + Sync {
    fn auth(&self) -> &Auth;

    fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>>;

    fn query(&self, query: &Query) -> StoreResult<Snapshot>;

    /// Inserts under a store-generated id and returns it.
    fn add(&self, collection: &str, data: Map<String, Value>) -> StoreResult<String>;

    /// Inserts under `id`; fails with `AlreadyExists` if it is taken.
    fn create(&self, collection: &str, id: &str, data: Map<String, Value>) -> StoreResult<()>;

    /// Applies all `updates` to one document atomically.
    fn update(&self, collection: &str, id: &str, updates: Vec<FieldUpdate>) -> StoreResult<()>;

    fn delete(&self, collection: &str, id: &str) -> StoreResult<()>;

    /// Starts a listener. The first item is the initial snapshot, or the
    /// error that prevented it.
    fn listen(&self, target: WatchTarget) -> Listener;

    /// Detaches every listener opened through this client.
    fn detach_all(&self);
}

/// Hands out store clients bound to an identity.
pub trait StoreConnector: Send + Sync {
    fn connect(&self, auth: Auth) -> Arc<dyn DocumentStore>;
}

impl StoreConnector for Arc<Database> {
    fn connect(&self, auth: Auth) -> Arc<dyn DocumentStore> {
        Arc::new(self.client(auth))
    }
}

/// A [`DocumentStore`] client on a local [`Database`], subject to its access
/// rules.
pub struct StoreClient {
    db: Arc<Database>,
    auth: Auth,
    owner: u64,
}

impl StoreClient {
    pub(crate) fn new(db: Arc<Database>, auth: Auth, owner: u64) -> Self {
        Self { db, auth, owner }
    }

    fn existing(&self, collection: &str, id: &str) -> StoreResult<Document> {
        self.db
            .fetch(collection, id)?
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })
    }
}

impl DocumentStore for StoreClient {
    fn auth(&self) -> &Auth {
        &self.auth
    }

    fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        self.db.read_document(&self.auth, collection, id)
    }

    fn query(&self, query: &Query) -> StoreResult<Snapshot> {
        Ok(Snapshot {
            docs: self.db.read_query(&self.auth, query)?,
        })
    }

    fn add(&self, collection: &str, data: Map<String, Value>) -> StoreResult<String> {
        let id = Uuid::new_v4().simple().to_string();
        self.create(collection, &id, data)?;
        Ok(id)
    }

    fn create(&self, collection: &str, id: &str, mut data: Map<String, Value>) -> StoreResult<()> {
        data.remove("id");
        self.db.authorize_create(&self.auth, collection, id, &data)?;
        self.db.insert(collection, id, &data)?;
        debug!("Created {}/{}", collection, id);
        self.db.notify(collection);
        Ok(())
    }

    fn update(&self, collection: &str, id: &str, updates: Vec<FieldUpdate>) -> StoreResult<()> {
        let current = self.existing(collection, id)?;
        self.db
            .authorize_update(&self.auth, collection, &current, &updates)?;
        self.db.apply_updates(collection, id, &updates)?;
        self.db.notify(collection);
        Ok(())
    }

    fn delete(&self, collection: &str, id: &str) -> StoreResult<()> {
        let current = self.existing(collection, id)?;
        self.db.authorize_delete(&self.auth, collection, &current)?;
        self.db.remove(collection, id)?;
        debug!("Deleted {}/{}", collection, id);
        self.db.notify(collection);
        Ok(())
    }

    fn listen(&self, target: WatchTarget) -> Listener {
        self.db.register(self.owner, self.auth.clone(), target)
    }

    fn detach_all(&self) {
        let removed = self.db.listeners.remove_owner(self.owner);
        if removed > 0 {
            debug!("Detached {} listener(s) for {:?}", removed, self.auth);
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{Direction, default_indexes};

    fn data(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    fn db() -> Arc<Database> {
        Arc::new(Database::open_in_memory(default_indexes()).unwrap())
    }

    #[test]
    fn test_add_then_get() {
        let db = db();
        let alice = db.client(Auth::User("alice".into()));
        let id = alice
            .add("events", data(json!({ "organizerId": "alice", "title": "Apéro" })))
            .unwrap();

        let doc = alice.get("events", &id).unwrap().unwrap();
        assert_eq!(doc.id, id);
        assert_eq!(doc.str_field("title"), Some("Apéro"));
        assert!(doc.get("id").is_none());
    }

    #[test]
    fn test_create_existing_id_fails() {
        let db = db();
        let alice = db.client(Auth::User("alice".into()));
        let doc = data(json!({ "eventId": "e1", "userId": "alice" }));
        alice.create("eventParticipants", "e1_alice", doc.clone()).unwrap();

        let err = alice.create("eventParticipants", "e1_alice", doc).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[test]
    fn test_increment_is_atomic_per_document() {
        let db = db();
        let admin = db.admin();
        admin
            .create("events", "e1", data(json!({ "organizerId": "o", "participantsCount": 1 })))
            .unwrap();

        for _ in 0..3 {
            admin
                .update("events", "e1", vec![FieldUpdate::increment("participantsCount", 1)])
                .unwrap();
        }
        admin
            .update("events", "e1", vec![FieldUpdate::increment("participantsCount", -1)])
            .unwrap();

        let doc = admin.get("events", "e1").unwrap().unwrap();
        assert_eq!(doc.get("participantsCount"), Some(&json!(3)));
    }

    #[test]
    fn test_update_missing_document() {
        let db = db();
        let err = db
            .admin()
            .update("chats", "nope", vec![FieldUpdate::set("lastMessage", "x")])
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn test_missing_index_fails_precondition() {
        let db = Arc::new(Database::open_in_memory(Vec::new()).unwrap());
        let query = Query::collection("events")
            .where_eq("organizerId", "alice")
            .order_by("createdAt", Direction::Desc);

        let err = db.admin().query(&query).unwrap_err();
        assert!(err.is_missing_index());
        assert_eq!(err.code(), "failed-precondition");

        // The same filters without ordering are served
        assert!(db.admin().query(&query.unordered()).is_ok());
    }

    #[test]
    fn test_connector_binds_identity() {
        let db = db();
        let store = db.connect(Auth::User("alice".into()));
        assert_eq!(store.auth().uid(), Some("alice"));
    }
}
