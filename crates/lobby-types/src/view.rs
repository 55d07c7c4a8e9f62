//! View models produced by the engine for chat and inbox screens.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::{ChatKind, MemberSnapshot, Message};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum TimelineEntry {
    DaySeparator { date: NaiveDate, label: String },
    Message { message: Message, time_label: String },
}

/// Messages in display order with day separators interleaved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    pub entries: Vec<TimelineEntry>,
}

impl Timeline {
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter().filter_map(|e| match e {
            TimelineEntry::Message { message, .. } => Some(message),
            TimelineEntry::DaySeparator { .. } => None,
        })
    }

    pub fn separator_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, TimelineEntry::DaySeparator { .. }))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHeader {
    pub chat_id: String,
    pub kind: ChatKind,
    pub title: String,
    pub member_count: usize,
    pub other_user: Option<MemberSnapshot>,
}

/// Everything a chat screen can be told. Every failure path maps to a
/// labeled variant so the screen never stays blank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ChatViewUpdate {
    /// The viewer is not a participant; the screen should send them back to
    /// the event page.
    AccessRequired { event_id: String, message: String },
    NotFound { message: String },
    /// The event exists but its chat has not been linked yet.
    Unavailable { message: String },
    Header(ChatHeader),
    Timeline(Timeline),
    Notice { message: String },
    Denied { message: String },
    Failed { message: String },
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxEntry {
    pub chat_id: String,
    pub kind: ChatKind,
    pub event_id: Option<String>,
    pub title: String,
    pub photo: Option<String>,
    pub last_message: Option<String>,
    pub last_message_sender: Option<String>,
    pub time_label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxSnapshot {
    pub event_chats: Vec<InboxEntry>,
    pub private_chats: Vec<InboxEntry>,
    pub notice: Option<String>,
}
