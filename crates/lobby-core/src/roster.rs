use std::sync::Arc;

use lobby_db::{DocumentStore, Query};
use lobby_types::collections::PARTICIPANTS;
use lobby_types::models::{Event, Participant};

use crate::error::LobbyResult;

/// Key of the membership record of `user_id` in `event_id`. One record per
/// pair is guaranteed by inserting under this key with create-if-absent.
pub fn participant_id(event_id: &str, user_id: &str) -> String {
    format!("{event_id}_{user_id}")
}

/// Whether `count` members exhaust `max` seats. No cap means never full.
pub fn capacity_reached(max: Option<u32>, count: usize) -> bool {
    max.is_some_and(|max| count >= max as usize)
}

#[derive(Clone)]
pub struct Roster {
    store: Arc<dyn DocumentStore>,
}

impl Roster {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Participants of an event, earliest first.
    pub fn list_participants(&self, event_id: &str) -> LobbyResult<Vec<Participant>> {
        let snapshot = self
            .store
            .query(&Query::collection(PARTICIPANTS).where_eq("eventId", event_id))?;
        let mut participants: Vec<Participant> = snapshot.decode_all()?;
        participants.sort_by_key(|p| p.joined_at);
        Ok(participants)
    }

    pub fn find_membership(&self, event_id: &str, user_id: &str) -> LobbyResult<Option<Participant>> {
        let doc = self
            .store
            .get(PARTICIPANTS, &participant_id(event_id, user_id))?;
        Ok(doc.map(|d| d.decode()).transpose()?)
    }

    pub fn is_participant(&self, event_id: &str, user_id: &str) -> LobbyResult<bool> {
        Ok(self.find_membership(event_id, user_id)?.is_some())
    }

    /// Full when the current roster has reached capacity. The stored
    /// counter is not consulted.
    pub fn is_full(&self, event: &Event) -> LobbyResult<bool> {
        if event.max_participants.is_none() {
            return Ok(false);
        }
        let count = self.list_participants(&event.id)?.len();
        Ok(capacity_reached(event.max_participants, count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_participant_id_is_deterministic() {
        assert_eq!(participant_id("evt", "usr"), "evt_usr");
        assert_eq!(participant_id("evt", "usr"), participant_id("evt", "usr"));
    }

    #[test]
    fn test_capacity_reached() {
        assert!(!capacity_reached(None, 1_000));
        assert!(!capacity_reached(Some(3), 2));
        assert!(capacity_reached(Some(3), 3));
        assert!(capacity_reached(Some(3), 4));
    }
}
