use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::models::{Event, HotelPlace, Participant, Thematique, Visibility};

// -- JWT Claims --

/// Claims issued by the identity provider. Shared by the REST middleware and
/// the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub name: String,
    #[serde(default)]
    pub photo: Option<String>,
    pub exp: usize,
}

// -- Events --

/// Event creation form. Date, time and theme stay optional here so missing
/// values surface as validation errors rather than decode failures.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub hotel: HotelPlace,
    #[serde(default)]
    pub arrival_date: Option<NaiveDate>,
    #[serde(default)]
    pub departure_date: Option<NaiveDate>,
    #[serde(default)]
    pub event_date: Option<NaiveDate>,
    #[serde(default)]
    pub event_time: Option<NaiveTime>,
    #[serde(default)]
    pub thematique: Option<Thematique>,
    #[serde(default)]
    pub max_participants: Option<u32>,
    #[serde(default)]
    pub visibility: Visibility,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEventResponse {
    pub event_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDetailResponse {
    pub event: Event,
    pub participants: Vec<Participant>,
    pub my_participation: Option<Participant>,
    pub is_full: bool,
    pub is_past: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinEventResponse {
    pub participant_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryWindow {
    #[default]
    Today,
    Week,
    Month,
}

#[derive(Debug, Default, Deserialize)]
pub struct DiscoveryQuery {
    #[serde(default)]
    pub window: DiscoveryWindow,
    pub theme: Option<Thematique>,
    pub place: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HotelSearchQuery {
    pub hotel: String,
}

#[derive(Debug, Serialize)]
pub struct EventListResponse {
    pub events: Vec<Event>,
}

// -- Chats --

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartChatResponse {
    pub chat_id: String,
    pub created: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub message_id: String,
    pub summary_stale: bool,
}

// -- Errors --

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
