use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether an event shows up in public discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Organizer,
    Participant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Event,
    Private,
}

impl ChatKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Private => "private",
        }
    }
}

/// Meetup theme catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Thematique {
    #[serde(rename = "apero")]
    Apero,
    #[serde(rename = "diner")]
    Diner,
    #[serde(rename = "coworking")]
    Coworking,
    #[serde(rename = "petit-dej")]
    PetitDej,
    #[serde(rename = "sport")]
    Sport,
    #[serde(rename = "talk-business")]
    TalkBusiness,
}

impl Thematique {
    pub const ALL: [Thematique; 6] = [
        Self::Apero,
        Self::Diner,
        Self::Coworking,
        Self::PetitDej,
        Self::Sport,
        Self::TalkBusiness,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Apero => "Apéro",
            Self::Diner => "Dîner",
            Self::Coworking => "Coworking",
            Self::PetitDej => "Petit-déjeuner",
            Self::Sport => "Sport",
            Self::TalkBusiness => "Talk Business",
        }
    }
}

/// Place selected through the hotel lookup service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotelPlace {
    pub name: String,
    #[serde(default)]
    pub address: String,
    pub city: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub place_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub hotel_name: String,
    #[serde(default)]
    pub hotel_address: String,
    #[serde(default)]
    pub hotel_city: String,
    #[serde(default)]
    pub hotel_place_id: Option<String>,
    /// Normalized lookup key. Older documents may lack it until backfilled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hotel_name_lower: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub event_date: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub arrival_date: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub departure_date: Option<DateTime<Utc>>,
    pub thematique: Thematique,
    #[serde(default)]
    pub max_participants: Option<u32>,
    #[serde(default)]
    pub visibility: Visibility,
    pub organizer_id: String,
    #[serde(default)]
    pub organizer_name: String,
    #[serde(default)]
    pub organizer_photo: Option<String>,
    #[serde(default)]
    pub participants_count: i64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    #[serde(default)]
    pub id: String,
    pub event_id: String,
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub user_photo: Option<String>,
    #[serde(default)]
    pub user_company: String,
    #[serde(default)]
    pub user_job_title: String,
    pub role: Role,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub joined_at: DateTime<Utc>,
}

/// Display data captured when a private chat is created. Not refreshed
/// when the profile changes afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberSnapshot {
    pub name: String,
    #[serde(default)]
    pub photo: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ChatKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members_data: Option<BTreeMap<String, MemberSnapshot>>,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_sender: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Chat {
    pub fn has_member(&self, user_id: &str) -> bool {
        self.members.iter().any(|m| m == user_id)
    }

    /// The member of a private chat that is not `user_id`.
    pub fn other_member(&self, user_id: &str) -> Option<&str> {
        self.members
            .iter()
            .map(String::as_str)
            .find(|m| *m != user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default)]
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub sender_photo: Option<String>,
    pub text: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

/// Profile document from the `users` collection, maintained outside the core.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default, rename = "photoURL")]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub job_title: String,
}

/// The signed-in user as seen by the engine: identity claims merged with
/// the stored profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUser {
    pub uid: String,
    pub display_name: String,
    pub photo_url: Option<String>,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub job_title: String,
}

impl CurrentUser {
    pub fn snapshot(&self) -> MemberSnapshot {
        MemberSnapshot {
            name: self.display_name.clone(),
            photo: self.photo_url.clone(),
        }
    }
}
