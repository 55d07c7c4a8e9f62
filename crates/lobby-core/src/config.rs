use chrono::{FixedOffset, Offset, Utc};
use serde::Deserialize;
use tracing::warn;

/// Engine knobs. Loaded from `LOBBY_*` environment variables by the server,
/// built directly in tests.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Events one user may create per local calendar day.
    pub daily_event_quota: u32,
    /// Most recent messages kept live in a chat view.
    pub message_window: usize,
    /// Offset of the "local" calendar used for quotas, day separators and
    /// time labels.
    pub utc_offset_minutes: i32,
    pub discovery_limit: usize,
    pub search_limit: usize,
    /// Upper bound on documents repaired per listing.
    pub backfill_batch: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            daily_event_quota: 3,
            message_window: 100,
            utc_offset_minutes: 0,
            discovery_limit: 20,
            search_limit: 50,
            backfill_batch: 50,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid {}={:?}", key, raw);
            default
        }),
        Err(_) => default,
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            daily_event_quota: env_or("LOBBY_DAILY_EVENT_QUOTA", d.daily_event_quota),
            message_window: env_or("LOBBY_MESSAGE_WINDOW", d.message_window),
            utc_offset_minutes: env_or("LOBBY_UTC_OFFSET_MINUTES", d.utc_offset_minutes),
            ..d
        }
    }

    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60)).unwrap_or_else(|| {
            warn!("UTC offset {} min out of range, using UTC", self.utc_offset_minutes);
            Utc.fix()
        })
    }
}
