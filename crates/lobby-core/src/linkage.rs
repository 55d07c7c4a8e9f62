use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use lobby_db::{DocumentStore, FieldUpdate, Query, StoreError, encode};
use lobby_types::collections::{CHATS, USERS};
use lobby_types::models::{Chat, ChatKind, CurrentUser, Event, MemberSnapshot, UserProfile};

use crate::clock::Clock;
use crate::error::{LobbyResult, ValidationError};

/// Display name used when a profile cannot be resolved.
pub const FALLBACK_USER_NAME: &str = "Utilisateur";

/// Key for the private chat of an unordered pair of users.
pub fn private_chat_id(a: &str, b: &str) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("private_{lo}_{hi}")
}

/// Resolves and maintains the chats linked to events and user pairs.
#[derive(Clone)]
pub struct ChatLinker {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
}

impl ChatLinker {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// The group chat of an event, if it has been linked yet. When several
    /// exist the first in store order wins.
    pub fn resolve_event_chat(&self, event_id: &str) -> LobbyResult<Option<Chat>> {
        let snapshot = self.store.query(&event_chat_query(event_id))?;
        if snapshot.len() > 1 {
            warn!(
                "Event {} has {} linked chats, using {}",
                event_id,
                snapshot.len(),
                snapshot.docs[0].id
            );
        }
        Ok(snapshot.first().map(|d| d.decode()).transpose()?)
    }

    pub fn create_event_chat(&self, event: &Event) -> Result<String, StoreError> {
        let chat = Chat {
            id: String::new(),
            kind: ChatKind::Event,
            event_id: Some(event.id.clone()),
            title: Some(event.title.clone()),
            members: vec![event.organizer_id.clone()],
            members_data: None,
            last_message: None,
            last_message_at: None,
            last_message_sender: None,
            created_at: self.clock.now(),
        };
        self.store.add(CHATS, encode(&chat)?)
    }

    /// Adds `user_id` to `members`. Adding a present member changes nothing.
    pub fn add_member(&self, chat_id: &str, user_id: &str) -> Result<(), StoreError> {
        self.store.update(
            CHATS,
            chat_id,
            vec![FieldUpdate::array_union(
                "members",
                vec![Value::String(user_id.to_string())],
            )],
        )
    }

    /// The private chat between `requester` and `target_uid`, created on
    /// first contact. Returns the chat and whether it was just created.
    pub fn resolve_or_create_private_chat(
        &self,
        requester: &CurrentUser,
        target_uid: &str,
    ) -> LobbyResult<(Chat, bool)> {
        if requester.uid == target_uid {
            return Err(ValidationError::SelfChat.into());
        }

        if let Some(chat) = self.find_private_chat(&requester.uid, target_uid)? {
            return Ok((chat, false));
        }

        let target = self
            .store
            .get(USERS, target_uid)?
            .map(|d| d.decode::<UserProfile>())
            .transpose()?;
        let target_snapshot = match target {
            Some(profile) => MemberSnapshot {
                name: display_name_or_fallback(&profile.display_name),
                photo: profile.photo_url,
            },
            None => {
                warn!("No profile for {}, snapshotting fallback name", target_uid);
                MemberSnapshot {
                    name: FALLBACK_USER_NAME.to_string(),
                    photo: None,
                }
            }
        };

        let mut members_data = BTreeMap::new();
        members_data.insert(requester.uid.clone(), requester.snapshot());
        members_data.insert(target_uid.to_string(), target_snapshot);

        let id = private_chat_id(&requester.uid, target_uid);
        let mut chat = Chat {
            id: String::new(),
            kind: ChatKind::Private,
            event_id: None,
            title: None,
            members: vec![requester.uid.clone(), target_uid.to_string()],
            members_data: Some(members_data),
            last_message: None,
            last_message_at: None,
            last_message_sender: None,
            created_at: self.clock.now(),
        };

        match self.store.create(CHATS, &id, encode(&chat)?) {
            Ok(()) => {
                info!("Private chat {} created", id);
                chat.id = id;
                Ok((chat, true))
            }
            // Lost a race with the other member
            Err(StoreError::AlreadyExists { .. }) => {
                let existing = self
                    .store
                    .get(CHATS, &id)?
                    .ok_or_else(|| crate::LobbyError::not_found(format!("{CHATS}/{id}")))?;
                Ok((existing.decode()?, false))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn find_private_chat(&self, requester: &str, target: &str) -> LobbyResult<Option<Chat>> {
        let query = Query::collection(CHATS)
            .where_contains("members", requester)
            .where_eq("type", ChatKind::Private.as_str());
        let chats: Vec<Chat> = self.store.query(&query)?.decode_all()?;
        Ok(chats.into_iter().find(|c| c.has_member(target)))
    }
}

pub(crate) fn event_chat_query(event_id: &str) -> Query {
    Query::collection(CHATS)
        .where_eq("eventId", event_id)
        .where_eq("type", ChatKind::Event.as_str())
}

pub(crate) fn display_name_or_fallback(name: &str) -> String {
    if name.trim().is_empty() {
        FALLBACK_USER_NAME.to_string()
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_chat_id_ignores_order() {
        assert_eq!(private_chat_id("bob", "alice"), "private_alice_bob");
        assert_eq!(private_chat_id("alice", "bob"), private_chat_id("bob", "alice"));
    }

    #[test]
    fn test_fallback_name() {
        assert_eq!(display_name_or_fallback("  "), FALLBACK_USER_NAME);
        assert_eq!(display_name_or_fallback("Zoé"), "Zoé");
    }
}
