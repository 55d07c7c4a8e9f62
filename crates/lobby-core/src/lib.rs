pub mod clock;
pub mod composer;
pub mod config;
pub mod discovery;
pub mod error;
pub mod gate;
pub mod identity;
pub mod inbox;
pub mod linkage;
pub mod registry;
pub mod roster;
pub mod session;
pub mod timeline;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use lobby_db::DocumentStore;
use lobby_types::api::{DiscoveryWindow, EventDetailResponse, EventDraft};
use lobby_types::models::{Chat, CurrentUser, Event, Thematique};
use lobby_types::view::InboxSnapshot;

pub use clock::{Clock, ManualClock, SystemClock};
pub use composer::{Composer, SendOutcome};
pub use config::EngineConfig;
pub use discovery::{Discovery, EventListing};
pub use error::{LobbyError, LobbyResult, ValidationError, WriteStep};
pub use gate::{AccessGate, GateDecision};
pub use identity::IdentityScope;
pub use inbox::InboxView;
pub use linkage::ChatLinker;
pub use registry::EventRegistry;
pub use roster::Roster;
pub use session::{ChatSession, ChatTarget, SessionState};

use identity::MembershipCache;
use roster::participant_id;

/// The engine as seen by one signed-in user.
///
/// Cheap to clone. Every component it hands out talks to the store as
/// that user.
#[derive(Clone)]
pub struct Lobby {
    store: Arc<dyn DocumentStore>,
    user: CurrentUser,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    memberships: MembershipCache,
}

impl Lobby {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        user: CurrentUser,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self::with_cache(store, user, clock, config, MembershipCache::default())
    }

    pub(crate) fn with_cache(
        store: Arc<dyn DocumentStore>,
        user: CurrentUser,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
        memberships: MembershipCache,
    ) -> Self {
        Self {
            store,
            user,
            clock,
            config,
            memberships,
        }
    }

    pub fn user(&self) -> &CurrentUser {
        &self.user
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> EventRegistry {
        EventRegistry::new(self.store.clone(), self.clock.clone(), self.config.clone())
    }

    pub fn roster(&self) -> Roster {
        Roster::new(self.store.clone())
    }

    pub fn linker(&self) -> ChatLinker {
        ChatLinker::new(self.store.clone(), self.clock.clone())
    }

    pub fn discovery(&self) -> Discovery {
        Discovery::new(self.store.clone(), self.clock.clone(), self.config.clone())
    }

    pub fn composer(&self) -> Composer {
        Composer::new(self.store.clone(), self.user.clone(), self.clock.clone())
    }

    pub fn create_event(&self, draft: &EventDraft) -> LobbyResult<String> {
        let event_id = self.registry().create_event(draft, &self.user)?;
        self.remember_membership(&event_id, true);
        Ok(event_id)
    }

    pub fn join_event(&self, event_id: &str) -> LobbyResult<String> {
        let result = self.registry().join_event(event_id, &self.user);
        if matches!(result, Ok(_) | Err(LobbyError::AlreadyJoined)) {
            self.remember_membership(event_id, true);
        }
        result
    }

    /// Leaves `event_id`. Organizers cannot leave their own event.
    pub fn leave_event(&self, event_id: &str) -> LobbyResult<()> {
        let membership = self
            .roster()
            .find_membership(event_id, &self.user.uid)?
            .ok_or_else(|| {
                LobbyError::not_found(format!("participation à {event_id}"))
            })?;
        self.registry()
            .leave_event(&participant_id(event_id, &self.user.uid), membership.role)?;
        self.remember_membership(event_id, false);
        Ok(())
    }

    pub fn event_detail(&self, event_id: &str) -> LobbyResult<EventDetailResponse> {
        let detail = self.registry().event_detail(event_id, &self.user.uid)?;
        self.remember_membership(event_id, detail.my_participation.is_some());
        Ok(detail)
    }

    pub fn upcoming_events(
        &self,
        window: DiscoveryWindow,
        theme: Option<Thematique>,
        place: Option<&str>,
    ) -> LobbyResult<EventListing> {
        self.discovery().upcoming(window, theme, place)
    }

    pub fn search_events(&self, hotel: &str) -> LobbyResult<EventListing> {
        self.discovery().search_by_hotel(hotel)
    }

    pub fn organizer_events(&self, user_id: &str) -> LobbyResult<Vec<Event>> {
        self.registry().organizer_events(user_id)
    }

    /// Finds or creates the private chat with `target_user_id`. The flag is
    /// set when the chat was created by this call.
    pub fn start_private_chat(&self, target_user_id: &str) -> LobbyResult<(Chat, bool)> {
        self.linker()
            .resolve_or_create_private_chat(&self.user, target_user_id)
    }

    pub fn send_message(&self, chat_id: &str, text: &str) -> LobbyResult<SendOutcome> {
        composer::send_message(
            &self.store,
            &self.user,
            self.clock.as_ref(),
            chat_id,
            text,
        )
    }

    /// Opens a chat screen. Updates are read from the returned session.
    pub fn open_chat(&self, target: ChatTarget, token: CancellationToken) -> ChatSession {
        let mut session = ChatSession::new(
            self.store.clone(),
            self.user.clone(),
            self.clock.clone(),
            self.config.clone(),
            target,
            token,
        );
        session.open();
        session
    }

    pub fn open_inbox(&self, token: CancellationToken) -> InboxView {
        let mut view = InboxView::new(
            self.store.clone(),
            self.user.clone(),
            self.clock.clone(),
            self.config.clone(),
            token,
        );
        view.open();
        view
    }

    pub fn inbox_snapshot(&self) -> LobbyResult<InboxSnapshot> {
        inbox::snapshot_once(self.store.as_ref(), &self.user, self.clock.now(), &self.config)
    }

    /// Membership of the viewer in `event_id` as last observed in this
    /// identity scope, if known.
    pub fn known_membership(&self, event_id: &str) -> Option<bool> {
        self.memberships
            .lock()
            .ok()
            .and_then(|cache| cache.get(event_id).copied())
    }

    pub(crate) fn remember_membership(&self, event_id: &str, member: bool) {
        if let Ok(mut cache) = self.memberships.lock() {
            cache.insert(event_id.to_string(), member);
        }
    }
}
