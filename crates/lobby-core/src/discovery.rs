use std::sync::Arc;

use chrono::{Duration, Months};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use lobby_db::{Direction, Document, DocumentStore, FieldUpdate, FilterOp, Query};
use lobby_types::api::DiscoveryWindow;
use lobby_types::collections::EVENTS;
use lobby_types::models::{Event, Thematique, Visibility};

use crate::clock::{Clock, local_day_bounds};
use crate::config::EngineConfig;
use crate::error::LobbyResult;
use crate::registry::hotel_name_key;

/// Field names older event documents used for the hotel name.
const LEGACY_HOTEL_FIELDS: [&str; 3] = ["hotel", "venueName", "placeName"];

/// Hotel name of a stored event, whichever field holds it.
pub fn stored_hotel_name(doc: &Document) -> Option<&str> {
    std::iter::once("hotelName")
        .chain(LEGACY_HOTEL_FIELDS)
        .filter_map(|field| doc.str_field(field))
        .find(|name| !name.trim().is_empty())
}

/// Events of a listing plus the handle of the lookup-key repair it
/// triggered, if any.
pub struct EventListing {
    pub events: Vec<Event>,
    pub backfill: Option<JoinHandle<usize>>,
}

#[derive(Clone)]
pub struct Discovery {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl Discovery {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        Self { store, clock, config }
    }

    /// Public events from now to the end of `window`, soonest first.
    /// `place` matches city or hotel name, case-insensitively.
    pub fn upcoming(
        &self,
        window: DiscoveryWindow,
        theme: Option<Thematique>,
        place: Option<&str>,
    ) -> LobbyResult<EventListing> {
        let now = self.clock.now();
        let end = match window {
            DiscoveryWindow::Today => local_day_bounds(now, self.config.offset()).1 - Duration::milliseconds(1),
            DiscoveryWindow::Week => now + Duration::days(7),
            DiscoveryWindow::Month => now
                .checked_add_months(Months::new(1))
                .unwrap_or(now + Duration::days(30)),
        };

        let query = Query::collection(EVENTS)
            .where_eq("visibility", "public")
            .filter("eventDate", FilterOp::Gte, now.timestamp_millis())
            .filter("eventDate", FilterOp::Lte, end.timestamp_millis())
            .order_by("eventDate", Direction::Asc)
            .limit(self.config.discovery_limit);
        let docs = self.store.query(&query)?.docs;

        let needle = place.map(|p| p.trim().to_lowercase()).filter(|p| !p.is_empty());
        let mut listing = self.listing(docs);
        listing.events.retain(|e| {
            theme.is_none_or(|t| e.thematique == t)
                && needle.as_deref().is_none_or(|n| {
                    e.hotel_city.to_lowercase().contains(n) || e.hotel_name.to_lowercase().contains(n)
                })
        });
        Ok(listing)
    }

    /// Public events whose hotel name starts with `hotel`. An empty search
    /// lists upcoming public events instead.
    pub fn search_by_hotel(&self, hotel: &str) -> LobbyResult<EventListing> {
        let key = hotel_name_key(hotel);
        let query = if key.is_empty() {
            Query::collection(EVENTS)
                .where_eq("visibility", "public")
                .filter("eventDate", FilterOp::Gte, self.clock.now().timestamp_millis())
                .order_by("eventDate", Direction::Asc)
        } else {
            Query::collection(EVENTS)
                .where_prefix("hotelNameLower", &key)
                .order_by("hotelNameLower", Direction::Asc)
        };
        let query = query.limit(self.config.search_limit);

        let docs = self.store.query(&query)?.docs;
        let mut listing = self.listing(docs);
        listing.events.retain(|e| e.visibility != Visibility::Private);
        Ok(listing)
    }

    /// Decodes a result page and schedules the repair of documents that lack
    /// the lookup key.
    fn listing(&self, docs: Vec<Document>) -> EventListing {
        let repairs: Vec<(String, String)> = docs
            .iter()
            .filter(|d| {
                d.str_field("hotelNameLower")
                    .is_none_or(|k| k.trim().is_empty())
            })
            .filter_map(|d| {
                let key = hotel_name_key(stored_hotel_name(d)?);
                Some((d.id.clone(), key))
            })
            .take(self.config.backfill_batch)
            .collect();

        let events = docs
            .into_iter()
            .filter_map(|mut d| {
                if d.str_field("hotelName").is_none_or(|n| n.trim().is_empty()) {
                    if let Some(name) = stored_hotel_name(&d).map(str::to_string) {
                        d.data.insert("hotelName".into(), Value::String(name));
                    }
                }
                match d.decode::<Event>() {
                    Ok(mut event) => {
                        if event.hotel_name_lower.is_none() {
                            event.hotel_name_lower = Some(hotel_name_key(&event.hotel_name));
                        }
                        Some(event)
                    }
                    Err(e) => {
                        warn!("Skipping event {}: {}", d.id, e);
                        None
                    }
                }
            })
            .collect();

        EventListing {
            events,
            backfill: self.spawn_backfill(repairs),
        }
    }

    fn spawn_backfill(&self, repairs: Vec<(String, String)>) -> Option<JoinHandle<usize>> {
        if repairs.is_empty() {
            return None;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime, skipping backfill of {} events", repairs.len());
            return None;
        };

        let store = self.store.clone();
        Some(runtime.spawn_blocking(move || backfill_hotel_keys(store.as_ref(), &repairs)))
    }
}

/// Writes the lookup key onto each listed event. Safe to repeat.
pub fn backfill_hotel_keys(store: &dyn DocumentStore, repairs: &[(String, String)]) -> usize {
    let mut repaired = 0;
    for (id, key) in repairs {
        match store.update(EVENTS, id, vec![FieldUpdate::set("hotelNameLower", key.as_str())]) {
            Ok(()) => repaired += 1,
            Err(e) => warn!("Backfill of event {} failed: {}", id, e),
        }
    }
    if repaired > 0 {
        info!("Backfilled hotel key on {} events", repaired);
    }
    repaired
}
