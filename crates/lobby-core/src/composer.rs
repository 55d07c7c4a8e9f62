use std::sync::Arc;

use tracing::error;

use lobby_db::{DocumentStore, FieldUpdate, encode};
use lobby_types::collections::{CHATS, MESSAGES};
use lobby_types::models::{CurrentUser, Message};

use crate::clock::Clock;
use crate::error::{LobbyError, LobbyResult, ValidationError};
use crate::gate::{AccessGate, GateDecision};
use crate::roster::Roster;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The message is stored. `summary_stale` is set when the chat preview
    /// could not be updated; the next send refreshes it.
    Sent { message_id: String, summary_stale: bool },
    /// Nothing to send.
    Ignored,
}

/// Former participants stay in an event chat's `members`, so posting there
/// goes through the same gate as opening it.
fn ensure_can_post(store: &Arc<dyn DocumentStore>, uid: &str, chat_id: &str) -> LobbyResult<()> {
    let chat = store
        .get(CHATS, chat_id)?
        .ok_or_else(|| LobbyError::not_found(format!("chat {chat_id}")))?;
    if chat.str_field("type") != Some("event") {
        return Ok(());
    }
    let Some(event_id) = chat.str_field("eventId") else {
        return Err(LobbyError::AccessDenied(format!("chat {chat_id} has no event")));
    };

    match AccessGate::new(Roster::new(store.clone())).check(event_id, uid)? {
        GateDecision::Allowed(_) => Ok(()),
        GateDecision::JoinRequired { event_id } => Err(LobbyError::AccessRequired { event_id }),
    }
}

/// Appends a message to `chat_id`, then updates the chat's last-message
/// summary. Only the first write decides success.
pub fn send_message(
    store: &Arc<dyn DocumentStore>,
    sender: &CurrentUser,
    clock: &dyn Clock,
    chat_id: &str,
    text: &str,
) -> LobbyResult<SendOutcome> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ValidationError::EmptyMessage.into());
    }
    ensure_can_post(store, &sender.uid, chat_id)?;

    let now = clock.now();
    let message = Message {
        id: String::new(),
        chat_id: chat_id.to_string(),
        sender_id: sender.uid.clone(),
        sender_name: sender.display_name.clone(),
        sender_photo: sender.photo_url.clone(),
        text: text.to_string(),
        created_at: now,
    };
    let message_id = store.add(MESSAGES, encode(&message)?)?;

    let summary = vec![
        FieldUpdate::set("lastMessage", text),
        FieldUpdate::set("lastMessageAt", now.timestamp_millis()),
        FieldUpdate::set("lastMessageSender", sender.display_name.as_str()),
    ];
    let summary_stale = match store.update(CHATS, chat_id, summary) {
        Ok(()) => false,
        Err(e) => {
            error!("Message {} stored but chat {} summary not updated: {}", message_id, chat_id, e);
            true
        }
    };

    Ok(SendOutcome::Sent {
        message_id,
        summary_stale,
    })
}

/// Message input of a chat screen.
pub struct Composer {
    store: Arc<dyn DocumentStore>,
    user: CurrentUser,
    clock: Arc<dyn Clock>,
    draft: String,
}

impl Composer {
    pub fn new(store: Arc<dyn DocumentStore>, user: CurrentUser, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            user,
            clock,
            draft: String::new(),
        }
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    /// Sends the draft to `chat_id`. The input is cleared up front; if the
    /// message cannot be stored the draft is put back verbatim.
    pub fn send(&mut self, chat_id: &str) -> LobbyResult<SendOutcome> {
        if self.draft.trim().is_empty() {
            return Ok(SendOutcome::Ignored);
        }

        let draft = std::mem::take(&mut self.draft);
        match send_message(&self.store, &self.user, self.clock.as_ref(), chat_id, &draft) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.draft = draft;
                Err(e)
            }
        }
    }
}
