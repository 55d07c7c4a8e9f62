pub mod error;
pub mod listener;
pub mod migrations;
pub mod models;
pub mod query;
mod queries;
mod rules;
pub mod store;

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

use lobby_types::collections::{CHATS, EVENTS, MESSAGES};

pub use error::{StoreError, StoreResult};
pub use listener::{Listener, TryRecvError, WatchTarget};
pub use models::{Document, FieldUpdate, Snapshot, encode};
pub use query::{CompositeIndex, Direction, FilterOp, Query};
pub use store::{Auth, DocumentStore, StoreClient, StoreConnector};

use listener::ListenerRegistry;

/// Schema-less document store on SQLite.
///
/// One writer connection behind a mutex: every single-document write is
/// atomic, nothing spans documents.
pub struct Database {
    conn: Mutex<Connection>,
    indexes: Vec<CompositeIndex>,
    listeners: Arc<ListenerRegistry>,
    next_owner: AtomicU64,
}

impl Database {
    pub fn open(path: &Path, indexes: Vec<CompositeIndex>) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let db = Self::init(conn, indexes)?;
        info!("Database opened at {}", path.display());
        Ok(db)
    }

    pub fn open_in_memory(indexes: Vec<CompositeIndex>) -> Result<Self> {
        Self::init(Connection::open_in_memory()?, indexes)
    }

    fn init(conn: Connection, indexes: Vec<CompositeIndex>) -> Result<Self> {
        migrations::run(&conn)?;
        migrations::ensure_indexes(&conn, &indexes)?;
        Ok(Self {
            conn: Mutex::new(conn),
            indexes,
            listeners: Arc::new(ListenerRegistry::default()),
            next_owner: AtomicU64::new(1),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("DB lock poisoned: {}", e)))?;
        f(&conn)
    }

    pub fn indexes(&self) -> &[CompositeIndex] {
        &self.indexes
    }

    /// A client acting as `auth`. Listeners opened through it can be
    /// detached together.
    pub fn client(self: &Arc<Self>, auth: Auth) -> StoreClient {
        let owner = self.next_owner.fetch_add(1, Ordering::Relaxed);
        StoreClient::new(self.clone(), auth, owner)
    }

    /// Privileged client that bypasses access rules (seeding, maintenance).
    pub fn admin(self: &Arc<Self>) -> StoreClient {
        self.client(Auth::Admin)
    }

    pub fn active_listeners(&self) -> usize {
        self.listeners.len()
    }
}

/// Composite indexes the engine's ordered queries rely on.
pub fn default_indexes() -> Vec<CompositeIndex> {
    vec![
        CompositeIndex::new(EVENTS, &["organizerId", "createdAt"]),
        CompositeIndex::new(EVENTS, &["visibility", "eventDate"]),
        CompositeIndex::new(MESSAGES, &["chatId", "createdAt"]),
        CompositeIndex::new(CHATS, &["members", "type", "lastMessageAt"]),
    ]
}

/// Process-wide store handle. Opens the database on first use and hands out
/// the same instance afterwards.
#[derive(Default)]
pub struct DatabaseHandle {
    slot: Mutex<Option<Arc<Database>>>,
}

impl DatabaseHandle {
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    pub fn get_or_open(&self, path: &Path, indexes: Vec<CompositeIndex>) -> Result<Arc<Database>> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|e| anyhow::anyhow!("Handle lock poisoned: {}", e))?;
        if let Some(db) = slot.as_ref() {
            return Ok(db.clone());
        }
        let db = Arc::new(Database::open(path, indexes)?);
        *slot = Some(db.clone());
        Ok(db)
    }

    pub fn get(&self) -> Option<Arc<Database>> {
        self.slot.lock().ok().and_then(|slot| slot.clone())
    }
}
