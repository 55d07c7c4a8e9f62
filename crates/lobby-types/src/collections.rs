//! Collection names shared by the store rules and the engine.

pub const EVENTS: &str = "events";
pub const PARTICIPANTS: &str = "eventParticipants";
pub const CHATS: &str = "chats";
pub const MESSAGES: &str = "messages";
pub const USERS: &str = "users";
