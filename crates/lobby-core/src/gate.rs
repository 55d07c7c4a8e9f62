use lobby_types::models::Participant;

use crate::error::LobbyResult;
use crate::roster::Roster;

#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Allowed(Participant),
    /// Not a participant: no chat or message listener may be opened.
    JoinRequired { event_id: String },
}

/// Checked before any event-chat listener is opened.
#[derive(Clone)]
pub struct AccessGate {
    roster: Roster,
}

impl AccessGate {
    pub fn new(roster: Roster) -> Self {
        Self { roster }
    }

    pub fn check(&self, event_id: &str, user_id: &str) -> LobbyResult<GateDecision> {
        Ok(match self.roster.find_membership(event_id, user_id)? {
            Some(participant) => GateDecision::Allowed(participant),
            None => GateDecision::JoinRequired {
                event_id: event_id.to_string(),
            },
        })
    }
}
