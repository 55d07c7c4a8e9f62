//! Access rules, evaluated on every client read and write.
//!
//! Anonymous callers are refused everything. `Auth::Admin` bypasses the
//! rules entirely.

use std::collections::HashMap;

use serde_json::{Map, Value};

use lobby_types::collections::{CHATS, EVENTS, MESSAGES, PARTICIPANTS, USERS};

use crate::error::{StoreError, StoreResult};
use crate::listener::WatchTarget;
use crate::models::{Document, FieldUpdate};
use crate::query::{FilterOp, Query};
use crate::store::Auth;
use crate::Database;

/// Per-evaluation memo of chat access decisions, so a page of messages
/// costs one chat lookup.
#[derive(Default)]
struct AccessCache {
    chats: HashMap<String, bool>,
}

fn signed_in(auth: &Auth) -> StoreResult<Option<&str>> {
    match auth {
        Auth::Anonymous => Err(StoreError::denied("sign-in required")),
        Auth::User(uid) => Ok(Some(uid)),
        Auth::Admin => Ok(None),
    }
}

fn str_of<'a>(data: &'a Map<String, Value>, field: &str) -> Option<&'a str> {
    data.get(field).and_then(Value::as_str)
}

fn contains_str(data: &Map<String, Value>, field: &str, needle: &str) -> bool {
    data.get(field)
        .and_then(Value::as_array)
        .is_some_and(|items| items.iter().any(|v| v.as_str() == Some(needle)))
}

impl Database {
    /// Reads what `target` currently resolves to, as `auth` may see it.
    pub(crate) fn read_target(&self, auth: &Auth, target: &WatchTarget) -> StoreResult<Vec<Document>> {
        match target {
            WatchTarget::Document { collection, id } => {
                Ok(self.read_document(auth, collection, id)?.into_iter().collect())
            }
            WatchTarget::Query(query) => self.read_query(auth, query),
        }
    }

    pub(crate) fn read_document(
        &self,
        auth: &Auth,
        collection: &str,
        id: &str,
    ) -> StoreResult<Option<Document>> {
        let uid = signed_in(auth)?;
        let doc = self.fetch(collection, id)?;
        if let (Some(uid), Some(doc)) = (uid, doc.as_ref()) {
            let mut cache = AccessCache::default();
            self.authorize_read(uid, collection, doc, &mut cache)?;
        }
        Ok(doc)
    }

    pub(crate) fn read_query(&self, auth: &Auth, query: &Query) -> StoreResult<Vec<Document>> {
        let uid = signed_in(auth)?;
        let mut cache = AccessCache::default();

        // Message reads are judged on the chat they name, not on what
        // happens to come back.
        if let Some(uid) = uid {
            if query.collection == MESSAGES {
                let chat_id = query
                    .filters
                    .iter()
                    .find(|f| f.field == "chatId" && f.op == FilterOp::Eq)
                    .and_then(|f| f.value.as_str())
                    .ok_or_else(|| StoreError::denied("message queries must name a chat"))?;
                if !self.can_access_chat(uid, chat_id, &mut cache)? {
                    return Err(StoreError::denied(format!("no access to chat {chat_id}")));
                }
            }
        }

        let docs = self.run_query(query)?;
        if let Some(uid) = uid {
            for doc in &docs {
                self.authorize_read(uid, &query.collection, doc, &mut cache)?;
            }
        }
        Ok(docs)
    }

    fn authorize_read(
        &self,
        uid: &str,
        collection: &str,
        doc: &Document,
        cache: &mut AccessCache,
    ) -> StoreResult<()> {
        let allowed = match collection {
            CHATS => self.chat_readable(uid, doc)?,
            MESSAGES => match doc.str_field("chatId") {
                Some(chat_id) => self.can_access_chat(uid, chat_id, cache)?,
                None => false,
            },
            _ => true,
        };

        if allowed {
            Ok(())
        } else {
            Err(StoreError::denied(format!("cannot read {collection}/{}", doc.id)))
        }
    }

    fn chat_readable(&self, uid: &str, chat: &Document) -> StoreResult<bool> {
        if contains_str(&chat.data, "members", uid) {
            return Ok(true);
        }
        if chat.str_field("type") != Some("event") {
            return Ok(false);
        }
        match chat.str_field("eventId") {
            Some(event_id) => self.is_participant(uid, event_id),
            None => Ok(false),
        }
    }

    fn can_access_chat(&self, uid: &str, chat_id: &str, cache: &mut AccessCache) -> StoreResult<bool> {
        if let Some(allowed) = cache.chats.get(chat_id) {
            return Ok(*allowed);
        }
        let allowed = match self.fetch(CHATS, chat_id)? {
            Some(chat) => self.chat_readable(uid, &chat)?,
            None => false,
        };
        cache.chats.insert(chat_id.to_string(), allowed);
        Ok(allowed)
    }

    fn is_participant(&self, uid: &str, event_id: &str) -> StoreResult<bool> {
        Ok(self
            .fetch(PARTICIPANTS, &format!("{event_id}_{uid}"))?
            .is_some())
    }

    // -- Writes --

    pub(crate) fn authorize_create(
        &self,
        auth: &Auth,
        collection: &str,
        id: &str,
        data: &Map<String, Value>,
    ) -> StoreResult<()> {
        let Some(uid) = signed_in(auth)? else {
            return Ok(());
        };

        let allowed = match collection {
            EVENTS => str_of(data, "organizerId") == Some(uid),
            PARTICIPANTS => str_of(data, "userId") == Some(uid),
            CHATS => contains_str(data, "members", uid),
            MESSAGES => {
                str_of(data, "senderId") == Some(uid)
                    && match str_of(data, "chatId") {
                        Some(chat_id) => {
                            self.can_access_chat(uid, chat_id, &mut AccessCache::default())?
                        }
                        None => false,
                    }
            }
            USERS => id == uid,
            _ => false,
        };

        if allowed {
            Ok(())
        } else {
            Err(StoreError::denied(format!("cannot create {collection}/{id}")))
        }
    }

    pub(crate) fn authorize_update(
        &self,
        auth: &Auth,
        collection: &str,
        current: &Document,
        updates: &[FieldUpdate],
    ) -> StoreResult<()> {
        let Some(uid) = signed_in(auth)? else {
            return Ok(());
        };

        let allowed = match collection {
            EVENTS => {
                current.str_field("organizerId") == Some(uid)
                    || updates.iter().all(|u| match u {
                        FieldUpdate::Increment(field, _) => field == "participantsCount",
                        FieldUpdate::Set(field, _) => field == "hotelNameLower",
                        FieldUpdate::ArrayUnion(..) => false,
                    })
            }
            PARTICIPANTS => current.str_field("userId") == Some(uid),
            CHATS => {
                if contains_str(&current.data, "members", uid) {
                    true
                } else {
                    // A participant may add exactly themselves to an event chat
                    let self_join = matches!(
                        updates,
                        [FieldUpdate::ArrayUnion(field, values)]
                            if field == "members" && values.len() == 1 && values[0].as_str() == Some(uid)
                    );
                    self_join
                        && current.str_field("type") == Some("event")
                        && match current.str_field("eventId") {
                            Some(event_id) => self.is_participant(uid, event_id)?,
                            None => false,
                        }
                }
            }
            USERS => current.id == uid,
            _ => false,
        };

        if allowed {
            Ok(())
        } else {
            Err(StoreError::denied(format!("cannot update {collection}/{}", current.id)))
        }
    }

    pub(crate) fn authorize_delete(
        &self,
        auth: &Auth,
        collection: &str,
        current: &Document,
    ) -> StoreResult<()> {
        let Some(uid) = signed_in(auth)? else {
            return Ok(());
        };

        let allowed = match collection {
            PARTICIPANTS => current.str_field("userId") == Some(uid),
            USERS => current.id == uid,
            _ => false,
        };

        if allowed {
            Ok(())
        } else {
            Err(StoreError::denied(format!("cannot delete {collection}/{}", current.id)))
        }
    }
}
