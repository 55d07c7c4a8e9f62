use std::sync::Arc;

use tracing::{debug, error, warn};

use lobby_core::{
    ChatSession, ChatTarget, Clock, EngineConfig, IdentityScope, InboxView, Lobby, LobbyError,
    LobbyResult, SendOutcome,
};
use lobby_db::{StoreConnector, StoreError};
use lobby_types::api::Claims;
use lobby_types::events::{GatewayCommand, GatewayEvent};
use lobby_types::models::CurrentUser;

const NO_OPEN_CHAT: &str = "Aucune conversation ouverte";
const INTERNAL_ERROR: &str = "Erreur interne du serveur";

/// What every connection needs to build its engine.
#[derive(Clone)]
pub struct GatewayContext {
    pub connector: Arc<dyn StoreConnector>,
    pub clock: Arc<dyn Clock>,
    pub config: EngineConfig,
}

enum View {
    Idle,
    Chat(ChatSession),
    Inbox(InboxView),
}

/// The views of one connected client. At most one view is open at a time;
/// opening another closes the current one first.
pub struct ViewHost {
    scope: Arc<IdentityScope>,
    lobby: Lobby,
    view: View,
}

impl ViewHost {
    pub async fn sign_in(ctx: &GatewayContext, claims: Claims) -> LobbyResult<Self> {
        let scope = Arc::new(IdentityScope::new(
            ctx.connector.clone(),
            ctx.clock.clone(),
            ctx.config.clone(),
        ));
        let lobby = {
            let scope = scope.clone();
            tokio::task::spawn_blocking(move || scope.sign_in(&claims.sub, &claims.name, claims.photo))
                .await
                .map_err(|e| {
                    error!("spawn_blocking join error: {}", e);
                    LobbyError::Transient(StoreError::Internal(e.to_string()))
                })??
        };
        Ok(Self {
            scope,
            lobby,
            view: View::Idle,
        })
    }

    pub fn user(&self) -> &CurrentUser {
        self.lobby.user()
    }

    /// Applies a client command. Returns the immediate reply, if any; view
    /// updates arrive through [`next_event`](Self::next_event).
    pub async fn apply(&mut self, cmd: GatewayCommand) -> Option<GatewayEvent> {
        match cmd {
            GatewayCommand::OpenEventChat { event_id } => self.open_chat(ChatTarget::Event(event_id)).await,
            GatewayCommand::OpenPrivateChat { chat_id } => self.open_chat(ChatTarget::Private(chat_id)).await,
            GatewayCommand::OpenInbox => {
                self.close_view();
                let lobby = self.lobby.clone();
                let token = self.scope.view_token();
                match tokio::task::spawn_blocking(move || lobby.open_inbox(token)).await {
                    Ok(view) => {
                        self.view = View::Inbox(view);
                        None
                    }
                    Err(e) => Some(internal_error(e)),
                }
            }
            GatewayCommand::SendMessage { text } => Some(self.send(text).await),
            GatewayCommand::CloseView => {
                self.close_view();
                None
            }
        }
    }

    async fn open_chat(&mut self, target: ChatTarget) -> Option<GatewayEvent> {
        self.close_view();
        debug!("{} opening {:?}", self.lobby.user().uid, target);
        let lobby = self.lobby.clone();
        let token = self.scope.view_token();
        match tokio::task::spawn_blocking(move || lobby.open_chat(target, token)).await {
            Ok(session) => {
                self.view = View::Chat(session);
                None
            }
            Err(e) => Some(internal_error(e)),
        }
    }

    async fn send(&mut self, text: String) -> GatewayEvent {
        let chat_id = match &self.view {
            View::Chat(session) => session.chat_id().map(str::to_string),
            _ => None,
        };
        let Some(chat_id) = chat_id else {
            return GatewayEvent::SendFailed {
                draft: text,
                message: NO_OPEN_CHAT.to_string(),
            };
        };

        let mut composer = self.lobby.composer();
        composer.set_draft(text);
        let result = tokio::task::spawn_blocking(move || match composer.send(&chat_id) {
            Ok(SendOutcome::Sent {
                message_id,
                summary_stale,
            }) => GatewayEvent::MessageSent {
                message_id,
                summary_stale,
            },
            Ok(SendOutcome::Ignored) => GatewayEvent::SendFailed {
                draft: String::new(),
                message: lobby_core::ValidationError::EmptyMessage.user_message().to_string(),
            },
            Err(e) => {
                warn!("Send to {} failed: {}", chat_id, e);
                GatewayEvent::SendFailed {
                    draft: composer.draft().to_string(),
                    message: e.user_message(),
                }
            }
        })
        .await;

        result.unwrap_or_else(internal_error)
    }

    /// Next update of the open view. Pends while no view is open. Safe to
    /// drop mid-await.
    pub async fn next_event(&mut self) -> GatewayEvent {
        loop {
            match &mut self.view {
                View::Idle => return std::future::pending().await,
                View::Chat(session) => {
                    if let Some(update) = session.next_update().await {
                        return GatewayEvent::ChatView(update);
                    }
                }
                View::Inbox(inbox) => {
                    if let Some(snapshot) = inbox.next_snapshot().await {
                        return GatewayEvent::Inbox(snapshot);
                    }
                    if let Some(e) = inbox.failure() {
                        let message = LobbyError::from(e.clone()).user_message();
                        self.view = View::Idle;
                        return GatewayEvent::Error { message };
                    }
                }
            }
            // The view ended on its own
            self.view = View::Idle;
        }
    }

    fn close_view(&mut self) {
        match std::mem::replace(&mut self.view, View::Idle) {
            View::Idle => {}
            View::Chat(mut session) => session.close(),
            View::Inbox(mut inbox) => inbox.close(),
        }
    }

    /// Closes the open view and drops everything bound to the identity.
    pub fn shutdown(&mut self) {
        self.close_view();
        self.scope.sign_out();
    }
}

fn internal_error(e: tokio::task::JoinError) -> GatewayEvent {
    error!("spawn_blocking join error: {}", e);
    GatewayEvent::Error {
        message: INTERNAL_ERROR.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};

    use super::*;
    use lobby_core::ManualClock;
    use lobby_db::{Auth, Database, default_indexes};
    use lobby_types::api::EventDraft;
    use lobby_types::models::{HotelPlace, Thematique};
    use lobby_types::view::ChatViewUpdate;

    fn context() -> (Arc<Database>, GatewayContext) {
        let db = Arc::new(Database::open_in_memory(default_indexes()).unwrap());
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap());
        let ctx = GatewayContext {
            connector: Arc::new(db.clone()),
            clock: Arc::new(clock),
            config: EngineConfig::default(),
        };
        (db, ctx)
    }

    fn claims(uid: &str, name: &str) -> Claims {
        Claims {
            sub: uid.into(),
            name: name.into(),
            photo: None,
            exp: 4_102_444_800,
        }
    }

    fn event_of(db: &Arc<Database>, ctx: &GatewayContext, uid: &str) -> String {
        let user = lobby_core::identity::resolve_user(
            db.connect(Auth::User(uid.into())).as_ref(),
            uid,
            uid,
            None,
        )
        .unwrap();
        let lobby = Lobby::new(
            db.connect(Auth::User(uid.into())),
            user,
            ctx.clock.clone(),
            ctx.config.clone(),
        );
        lobby
            .create_event(&EventDraft {
                title: "Apéro".into(),
                hotel: HotelPlace {
                    name: "Hôtel du Parc".into(),
                    city: "Lyon".into(),
                    ..Default::default()
                },
                event_date: NaiveDate::from_ymd_opt(2026, 6, 10),
                event_time: NaiveTime::from_hms_opt(19, 0, 0),
                thematique: Some(Thematique::Apero),
                ..Default::default()
            })
            .unwrap()
    }

    #[tokio::test]
    async fn test_chat_view_and_send() {
        let (db, ctx) = context();
        let event_id = event_of(&db, &ctx, "alice");
        let mut host = ViewHost::sign_in(&ctx, claims("alice", "Alice")).await.unwrap();
        assert_eq!(host.user().display_name, "Alice");

        assert!(host.apply(GatewayCommand::OpenEventChat { event_id }).await.is_none());
        assert!(matches!(
            host.next_event().await,
            GatewayEvent::ChatView(ChatViewUpdate::Header(_))
        ));
        assert!(matches!(
            host.next_event().await,
            GatewayEvent::ChatView(ChatViewUpdate::Timeline(_))
        ));

        let reply = host
            .apply(GatewayCommand::SendMessage { text: "Bonsoir".into() })
            .await;
        assert!(matches!(reply, Some(GatewayEvent::MessageSent { summary_stale: false, .. })));

        let mut saw_message = false;
        for _ in 0..4 {
            if let GatewayEvent::ChatView(ChatViewUpdate::Timeline(t)) = host.next_event().await {
                if t.messages().any(|m| m.text == "Bonsoir") {
                    saw_message = true;
                    break;
                }
            }
        }
        assert!(saw_message);

        host.shutdown();
        assert_eq!(db.active_listeners(), 0);
    }

    #[tokio::test]
    async fn test_send_without_chat_keeps_draft() {
        let (_db, ctx) = context();
        let mut host = ViewHost::sign_in(&ctx, claims("bob", "Bob")).await.unwrap();

        let reply = host
            .apply(GatewayCommand::SendMessage { text: "Hello".into() })
            .await;
        match reply {
            Some(GatewayEvent::SendFailed { draft, .. }) => assert_eq!(draft, "Hello"),
            other => panic!("expected send failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_outsider_gets_access_required() {
        let (db, ctx) = context();
        let event_id = event_of(&db, &ctx, "alice");
        let mut host = ViewHost::sign_in(&ctx, claims("carol", "Carol")).await.unwrap();

        host.apply(GatewayCommand::OpenEventChat { event_id: event_id.clone() }).await;
        match host.next_event().await {
            GatewayEvent::ChatView(ChatViewUpdate::AccessRequired { event_id: id, .. }) => {
                assert_eq!(id, event_id)
            }
            other => panic!("expected access required, got {other:?}"),
        }
        assert_eq!(db.active_listeners(), 0);
    }

    #[tokio::test]
    async fn test_switching_views_detaches_previous() {
        let (db, ctx) = context();
        let event_id = event_of(&db, &ctx, "alice");
        let mut host = ViewHost::sign_in(&ctx, claims("alice", "Alice")).await.unwrap();

        host.apply(GatewayCommand::OpenEventChat { event_id }).await;
        host.next_event().await;
        host.next_event().await;
        assert_eq!(db.active_listeners(), 2);

        host.apply(GatewayCommand::OpenInbox).await;
        assert_eq!(db.active_listeners(), 2);
        match host.next_event().await {
            GatewayEvent::Inbox(_) => {}
            other => panic!("expected inbox, got {other:?}"),
        }

        host.apply(GatewayCommand::CloseView).await;
        assert_eq!(db.active_listeners(), 0);
    }
}
