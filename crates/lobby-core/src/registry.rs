use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use lobby_db::{Direction, DocumentStore, FieldUpdate, FilterOp, Query, StoreError, encode};
use lobby_types::api::{EventDetailResponse, EventDraft};
use lobby_types::collections::{EVENTS, PARTICIPANTS};
use lobby_types::models::{CurrentUser, Event, Participant, Role, Visibility};

use crate::clock::{Clock, local_day_bounds, local_to_utc};
use crate::config::EngineConfig;
use crate::error::{LobbyError, LobbyResult, ValidationError, WriteStep};
use crate::linkage::ChatLinker;
use crate::roster::{Roster, capacity_reached, participant_id};

/// Lowercased lookup key for hotel-name prefix search.
pub fn hotel_name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Event lifecycle: creation, join, leave.
///
/// Every multi-step operation is a sequence of independent single-document
/// writes. A failure after the first write is reported as
/// [`LobbyError::PartialWrite`] and nothing is rolled back.
#[derive(Clone)]
pub struct EventRegistry {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    roster: Roster,
    linker: ChatLinker,
}

impl EventRegistry {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        Self {
            roster: Roster::new(store.clone()),
            linker: ChatLinker::new(store.clone(), clock.clone()),
            store,
            clock,
            config,
        }
    }

    /// Checks a draft and returns the event instant.
    pub fn validate(&self, draft: &EventDraft) -> Result<DateTime<Utc>, ValidationError> {
        if draft.title.trim().is_empty() {
            return Err(ValidationError::MissingTitle);
        }
        if draft.hotel.name.trim().is_empty() {
            return Err(ValidationError::MissingHotelName);
        }
        if draft.hotel.city.trim().is_empty() {
            return Err(ValidationError::MissingCity);
        }
        let date = draft.event_date.ok_or(ValidationError::MissingDate)?;
        let time = draft.event_time.ok_or(ValidationError::MissingTime)?;
        if draft.thematique.is_none() {
            return Err(ValidationError::MissingTheme);
        }
        if draft.max_participants == Some(0) {
            return Err(ValidationError::InvalidCapacity);
        }

        let at = local_to_utc(date.and_time(time), self.config.offset());
        if at <= self.clock.now() {
            return Err(ValidationError::EventInPast);
        }

        if let (Some(arrival), Some(departure)) = (draft.arrival_date, draft.departure_date) {
            if departure < arrival {
                return Err(ValidationError::DepartureBeforeArrival);
            }
            if date < arrival || date > departure {
                return Err(ValidationError::OutsideStay);
            }
        }

        Ok(at)
    }

    /// Events `user_id` created during the current local day.
    pub fn created_today(&self, user_id: &str) -> LobbyResult<usize> {
        let (start, end) = local_day_bounds(self.clock.now(), self.config.offset());
        let query = Query::collection(EVENTS)
            .where_eq("organizerId", user_id)
            .filter("createdAt", FilterOp::Gte, start.timestamp_millis())
            .filter("createdAt", FilterOp::Lt, end.timestamp_millis());
        Ok(self.store.query(&query)?.len())
    }

    /// Creates the event, the organizer's membership and the event chat.
    pub fn create_event(&self, draft: &EventDraft, organizer: &CurrentUser) -> LobbyResult<String> {
        let event_date = self.validate(draft)?;
        let Some(thematique) = draft.thematique else {
            return Err(ValidationError::MissingTheme.into());
        };

        let limit = self.config.daily_event_quota;
        if self.created_today(&organizer.uid)? >= limit as usize {
            return Err(LobbyError::QuotaExceeded { limit });
        }

        let now = self.clock.now();
        let to_utc = |d: chrono::NaiveDate| {
            local_to_utc(d.and_time(chrono::NaiveTime::MIN), self.config.offset())
        };
        let mut event = Event {
            id: String::new(),
            title: draft.title.trim().to_string(),
            description: draft.description.trim().to_string(),
            hotel_name: draft.hotel.name.trim().to_string(),
            hotel_address: draft.hotel.address.clone(),
            hotel_city: draft.hotel.city.trim().to_string(),
            hotel_place_id: draft.hotel.place_id.clone(),
            hotel_name_lower: Some(hotel_name_key(&draft.hotel.name)),
            event_date,
            arrival_date: draft.arrival_date.map(to_utc),
            departure_date: draft.departure_date.map(to_utc),
            thematique,
            max_participants: draft.max_participants,
            visibility: draft.visibility,
            organizer_id: organizer.uid.clone(),
            organizer_name: organizer.display_name.clone(),
            organizer_photo: organizer.photo_url.clone(),
            participants_count: 1,
            created_at: now,
            updated_at: now,
        };

        event.id = self.store.add(EVENTS, encode(&event)?)?;
        info!("Event {} created by {}", event.id, organizer.uid);

        self.participant_for(&event.id, organizer, Role::Organizer)
            .and_then(|(pid, data)| self.store.create(PARTICIPANTS, &pid, data))
            .map_err(|e| self.partial(WriteStep::OrganizerParticipant, &event.id, e))?;

        self.linker
            .create_event_chat(&event)
            .map_err(|e| self.partial(WriteStep::EventChat, &event.id, e))?;

        Ok(event.id)
    }

    /// Adds `user` to the event roster, bumps the counter and adds them to
    /// the event chat. Returns the participant id.
    pub fn join_event(&self, event_id: &str, user: &CurrentUser) -> LobbyResult<String> {
        let event = self.load_event(event_id)?;

        // Members of a full event are told they already joined
        if self.roster.find_membership(event_id, &user.uid)?.is_some() {
            return Err(LobbyError::AlreadyJoined);
        }
        let roster = self.roster.list_participants(event_id)?;
        if capacity_reached(event.max_participants, roster.len()) {
            return Err(LobbyError::Capacity {
                max: event.max_participants.unwrap_or_default(),
            });
        }

        let (pid, data) = self.participant_for(event_id, user, Role::Participant)?;
        match self.store.create(PARTICIPANTS, &pid, data) {
            Ok(()) => {}
            Err(StoreError::AlreadyExists { .. }) => return Err(LobbyError::AlreadyJoined),
            Err(e) => return Err(e.into()),
        }

        self.store
            .update(
                EVENTS,
                event_id,
                vec![FieldUpdate::increment("participantsCount", 1)],
            )
            .map_err(|e| self.partial(WriteStep::Counter, event_id, e))?;

        let chat = self
            .linker
            .resolve_event_chat(event_id)
            .map_err(|e| match e {
                LobbyError::Transient(source) | LobbyError::Configuration(source) => {
                    self.partial(WriteStep::ChatMembership, event_id, source)
                }
                other => other,
            })?;
        match chat {
            Some(chat) => self
                .linker
                .add_member(&chat.id, &user.uid)
                .map_err(|e| self.partial(WriteStep::ChatMembership, event_id, e))?,
            None => warn!("Event {} has no linked chat, {} joined without chat", event_id, user.uid),
        }

        info!("{} joined event {}", user.uid, event_id);
        Ok(pid)
    }

    /// Removes a participant and decrements the counter. Chat membership
    /// is left as is.
    pub fn leave_event(&self, participant_id: &str, role: Role) -> LobbyResult<()> {
        if role == Role::Organizer {
            return Err(LobbyError::OrganizerCannotLeave);
        }

        let participant: Participant = self
            .store
            .get(PARTICIPANTS, participant_id)?
            .ok_or_else(|| LobbyError::not_found(format!("{PARTICIPANTS}/{participant_id}")))?
            .decode()?;
        if participant.role == Role::Organizer {
            return Err(LobbyError::OrganizerCannotLeave);
        }

        self.store.delete(PARTICIPANTS, participant_id)?;
        self.store
            .update(
                EVENTS,
                &participant.event_id,
                vec![FieldUpdate::increment("participantsCount", -1)],
            )
            .map_err(|e| self.partial(WriteStep::Counter, &participant.event_id, e))?;

        info!("{} left event {}", participant.user_id, participant.event_id);
        Ok(())
    }

    pub fn event_detail(&self, event_id: &str, viewer_id: &str) -> LobbyResult<EventDetailResponse> {
        let event = self.load_event(event_id)?;
        let participants = self.roster.list_participants(event_id)?;
        let my_participation = participants
            .iter()
            .find(|p| p.user_id == viewer_id)
            .cloned();
        let is_full = capacity_reached(event.max_participants, participants.len());
        let is_past = event.event_date < self.clock.now();

        Ok(EventDetailResponse {
            event,
            participants,
            my_participation,
            is_full,
            is_past,
        })
    }

    /// Public events organized by `user_id`, newest first.
    pub fn organizer_events(&self, user_id: &str) -> LobbyResult<Vec<Event>> {
        let query = Query::collection(EVENTS)
            .where_eq("organizerId", user_id)
            .order_by("createdAt", Direction::Desc);
        let events: Vec<Event> = self.store.query(&query)?.decode_all()?;
        Ok(events
            .into_iter()
            .filter(|e| e.visibility == Visibility::Public)
            .collect())
    }

    fn load_event(&self, event_id: &str) -> LobbyResult<Event> {
        Ok(self
            .store
            .get(EVENTS, event_id)?
            .ok_or_else(|| LobbyError::not_found(format!("{EVENTS}/{event_id}")))?
            .decode()?)
    }

    fn participant_for(
        &self,
        event_id: &str,
        user: &CurrentUser,
        role: Role,
    ) -> Result<(String, serde_json::Map<String, serde_json::Value>), StoreError> {
        let participant = Participant {
            id: participant_id(event_id, &user.uid),
            event_id: event_id.to_string(),
            user_id: user.uid.clone(),
            user_name: user.display_name.clone(),
            user_photo: user.photo_url.clone(),
            user_company: user.company.clone(),
            user_job_title: user.job_title.clone(),
            role,
            joined_at: self.clock.now(),
        };
        let data = encode(&participant)?;
        Ok((participant.id, data))
    }

    fn partial(&self, step: WriteStep, event_id: &str, source: StoreError) -> LobbyError {
        error!("Event {}: {} failed: {}", event_id, step, source);
        LobbyError::partial(step, event_id, source)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime, TimeZone};

    use super::*;
    use crate::clock::ManualClock;
    use lobby_db::{Auth, Database, StoreConnector, default_indexes};
    use lobby_types::models::{HotelPlace, Thematique};

    fn registry(now: DateTime<Utc>) -> EventRegistry {
        let db = Arc::new(Database::open_in_memory(default_indexes()).unwrap());
        EventRegistry::new(
            db.connect(Auth::User("org".into())),
            Arc::new(ManualClock::new(now)),
            EngineConfig::default(),
        )
    }

    fn draft() -> EventDraft {
        EventDraft {
            title: "Apéro rooftop".into(),
            hotel: HotelPlace {
                name: "Le Grand Hôtel".into(),
                city: "Lyon".into(),
                ..Default::default()
            },
            event_date: NaiveDate::from_ymd_opt(2026, 6, 10),
            event_time: NaiveTime::from_hms_opt(19, 0, 0),
            thematique: Some(Thematique::Apero),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_required_fields() {
        let reg = registry(Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap());
        assert!(reg.validate(&draft()).is_ok());

        let mut d = draft();
        d.title = "   ".into();
        assert_eq!(reg.validate(&d), Err(ValidationError::MissingTitle));

        let mut d = draft();
        d.event_time = None;
        assert_eq!(reg.validate(&d), Err(ValidationError::MissingTime));

        let mut d = draft();
        d.thematique = None;
        assert_eq!(reg.validate(&d), Err(ValidationError::MissingTheme));
    }

    #[test]
    fn test_validate_rejects_past_event() {
        let reg = registry(Utc.with_ymd_and_hms(2026, 6, 10, 19, 30, 0).unwrap());
        assert_eq!(reg.validate(&draft()), Err(ValidationError::EventInPast));
    }

    #[test]
    fn test_validate_stay_window() {
        let reg = registry(Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap());

        let mut d = draft();
        d.arrival_date = NaiveDate::from_ymd_opt(2026, 6, 12);
        d.departure_date = NaiveDate::from_ymd_opt(2026, 6, 11);
        assert_eq!(reg.validate(&d), Err(ValidationError::DepartureBeforeArrival));

        d.arrival_date = NaiveDate::from_ymd_opt(2026, 6, 11);
        d.departure_date = NaiveDate::from_ymd_opt(2026, 6, 14);
        assert_eq!(reg.validate(&d), Err(ValidationError::OutsideStay));

        // Event on the arrival day is inside the stay
        d.arrival_date = NaiveDate::from_ymd_opt(2026, 6, 10);
        assert!(reg.validate(&d).is_ok());

        // Only one bound given: not checked
        d.departure_date = None;
        d.arrival_date = NaiveDate::from_ymd_opt(2026, 6, 20);
        assert!(reg.validate(&d).is_ok());
    }

    #[test]
    fn test_hotel_name_key() {
        assert_eq!(hotel_name_key("  Le Grand HÔTEL "), "le grand hôtel");
    }
}
