#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde_json::{Map, Value, json};

use lobby_core::{Clock, EngineConfig, Lobby, ManualClock};
use lobby_db::{
    Auth, Database, Document, DocumentStore, FieldUpdate, Listener, Query, Snapshot, StoreConnector,
    StoreError, StoreResult, WatchTarget, default_indexes, encode,
};
use lobby_types::api::EventDraft;
use lobby_types::collections::{MESSAGES, USERS};
use lobby_types::models::{CurrentUser, HotelPlace, Message, Thematique};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Create,
    Update,
    Delete,
}

/// Store wrapper that fails chosen writes, to exercise partial failures.
/// Also records the thread each listener was opened from.
pub struct FlakyStore {
    inner: Arc<dyn DocumentStore>,
    faults: Mutex<Vec<(Op, String)>>,
    listened_from: Mutex<Vec<ThreadId>>,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn DocumentStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            faults: Mutex::new(Vec::new()),
            listened_from: Mutex::new(Vec::new()),
        })
    }

    pub fn listen_threads(&self) -> Vec<ThreadId> {
        self.listened_from.lock().unwrap().clone()
    }

    pub fn fail(&self, op: Op, collection: &str) {
        self.faults.lock().unwrap().push((op, collection.to_string()));
    }

    pub fn heal(&self) {
        self.faults.lock().unwrap().clear();
    }

    fn check(&self, op: Op, collection: &str) -> StoreResult<()> {
        let faults = self.faults.lock().unwrap();
        if faults.iter().any(|(o, c)| *o == op && c == collection) {
            return Err(StoreError::Unavailable(format!("injected {op:?} failure on {collection}")));
        }
        Ok(())
    }
}

impl DocumentStore for FlakyStore {
    fn auth(&self) -> &Auth {
        self.inner.auth()
    }

    fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        self.inner.get(collection, id)
    }

    fn query(&self, query: &Query) -> StoreResult<Snapshot> {
        self.inner.query(query)
    }

    fn add(&self, collection: &str, data: Map<String, Value>) -> StoreResult<String> {
        self.check(Op::Add, collection)?;
        self.inner.add(collection, data)
    }

    fn create(&self, collection: &str, id: &str, data: Map<String, Value>) -> StoreResult<()> {
        self.check(Op::Create, collection)?;
        self.inner.create(collection, id, data)
    }

    fn update(&self, collection: &str, id: &str, updates: Vec<FieldUpdate>) -> StoreResult<()> {
        self.check(Op::Update, collection)?;
        self.inner.update(collection, id, updates)
    }

    fn delete(&self, collection: &str, id: &str) -> StoreResult<()> {
        self.check(Op::Delete, collection)?;
        self.inner.delete(collection, id)
    }

    fn listen(&self, target: WatchTarget) -> Listener {
        self.listened_from.lock().unwrap().push(std::thread::current().id());
        self.inner.listen(target)
    }

    fn detach_all(&self) {
        self.inner.detach_all()
    }
}

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

pub fn database() -> Arc<Database> {
    Arc::new(Database::open_in_memory(default_indexes()).unwrap())
}

pub fn user(uid: &str, name: &str) -> CurrentUser {
    CurrentUser {
        uid: uid.into(),
        display_name: name.into(),
        photo_url: None,
        company: String::new(),
        job_title: String::new(),
    }
}

pub fn seed_profile(db: &Arc<Database>, uid: &str, name: &str) {
    let data = json!({ "id": uid, "displayName": name });
    db.admin()
        .create(USERS, uid, data.as_object().cloned().unwrap())
        .unwrap();
}

pub fn seed_message(db: &Arc<Database>, chat_id: &str, sender: &str, text: &str, when: DateTime<Utc>) {
    let message = Message {
        id: String::new(),
        chat_id: chat_id.into(),
        sender_id: sender.into(),
        sender_name: sender.into(),
        sender_photo: None,
        text: text.into(),
        created_at: when,
    };
    db.admin().add(MESSAGES, encode(&message).unwrap()).unwrap();
}

/// Engine for `uid` on `db`, sharing `clock`.
pub fn lobby(db: &Arc<Database>, clock: &Arc<ManualClock>, uid: &str, name: &str) -> Lobby {
    lobby_with(db, clock, uid, name, EngineConfig::default())
}

pub fn lobby_with(
    db: &Arc<Database>,
    clock: &Arc<ManualClock>,
    uid: &str,
    name: &str,
    config: EngineConfig,
) -> Lobby {
    let clock: Arc<dyn Clock> = clock.clone();
    Lobby::new(db.connect(Auth::User(uid.into())), user(uid, name), clock, config)
}

/// Engine for `uid` whose writes go through `store`.
pub fn lobby_on(store: Arc<dyn DocumentStore>, clock: &Arc<ManualClock>, uid: &str, name: &str) -> Lobby {
    let clock: Arc<dyn Clock> = clock.clone();
    Lobby::new(store, user(uid, name), clock, EngineConfig::default())
}

/// Apéro on 2026-06-10 at 19:00.
pub fn draft(title: &str) -> EventDraft {
    EventDraft {
        title: title.into(),
        hotel: HotelPlace {
            name: "Hôtel du Parc".into(),
            city: "Lyon".into(),
            ..Default::default()
        },
        event_date: NaiveDate::from_ymd_opt(2026, 6, 10),
        event_time: NaiveTime::from_hms_opt(19, 0, 0),
        thematique: Some(Thematique::Apero),
        ..Default::default()
    }
}
