//! Live chat view: chat listener, message listener and the timeline built
//! from them.

use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use lobby_db::{
    Direction, DocumentStore, Listener, Query, Snapshot, StoreError, StoreResult, TryRecvError,
    WatchTarget,
};
use lobby_types::collections::{CHATS, EVENTS, MESSAGES, USERS};
use lobby_types::models::{Chat, ChatKind, CurrentUser, MemberSnapshot, Message, UserProfile};
use lobby_types::view::{ChatHeader, ChatViewUpdate};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::LobbyError;
use crate::gate::{AccessGate, GateDecision};
use crate::linkage::{FALLBACK_USER_NAME, display_name_or_fallback, event_chat_query};
use crate::roster::Roster;
use crate::timeline::build_timeline;

pub const DENIED_MESSAGE: &str = "Accès non autorisé";
const JOIN_REQUIRED_MESSAGE: &str = "Vous devez rejoindre l'événement pour accéder au chat";
const EVENT_NOT_FOUND_MESSAGE: &str = "Événement non trouvé";
const CHAT_NOT_FOUND_MESSAGE: &str = "Conversation introuvable";
const CHAT_UNAVAILABLE_MESSAGE: &str = "Le chat de cet événement n'est pas encore disponible";
const LOAD_FAILED_MESSAGE: &str = "Erreur lors du chargement des messages";
const INDEX_NOTICE: &str =
    "Index de base de données manquant : les messages sont triés localement";
const EVENT_CHAT_TITLE: &str = "Discussion de l'événement";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatTarget {
    Event(String),
    Private(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    ResolvingChat,
    Subscribed(String),
    AccessRequired,
    NotFound,
    /// No chat linked to the event yet. The chat listener stays open and
    /// the session moves on once one appears.
    Unavailable,
    Denied,
    Failed,
}

enum Wake {
    Cancelled,
    Chat(Option<StoreResult<Snapshot>>),
    Messages(Option<StoreResult<Snapshot>>),
}

impl Wake {
    /// Whether turning this wake-up into a [`Step`] reads from the store.
    fn needs_store(&self, degraded: bool) -> bool {
        match self {
            Self::Chat(Some(Ok(_))) => true,
            Self::Messages(Some(Err(e))) => e.is_missing_index() && !degraded,
            _ => false,
        }
    }
}

/// A chat notification once its store work is done.
enum ChatStep {
    /// No chat document, or none linked to the event yet.
    Missing,
    Denied { chat_id: String },
    Subscribe {
        chat_id: String,
        header: ChatHeader,
        listener: Listener,
        degraded: bool,
    },
}

/// A wake-up with its store work done, ready to apply to the session.
enum Step {
    Closed,
    Chat(StoreResult<ChatStep>),
    Fallback {
        chat_id: String,
        error: StoreError,
        listener: Listener,
    },
    MessagesFailed(StoreError),
    Messages(Snapshot),
}

/// The most recent `window` messages of a chat, newest first.
pub fn messages_query(chat_id: &str, window: usize) -> Query {
    Query::collection(MESSAGES)
        .where_eq("chatId", chat_id)
        .order_by("createdAt", Direction::Desc)
        .limit(window)
}

async fn next_item(listener: &mut Option<Listener>) -> Option<StoreResult<Snapshot>> {
    match listener {
        Some(l) => l.next().await,
        None => std::future::pending().await,
    }
}

/// Non-blocking poll: `None` when nothing is queued, `Some(None)` once the
/// listener has been detached.
fn poll_item(listener: &mut Option<Listener>) -> Option<Option<StoreResult<Snapshot>>> {
    match listener.as_mut()?.try_recv() {
        Ok(item) => Some(Some(item)),
        Err(TryRecvError::Empty) => None,
        Err(TryRecvError::Disconnected) => Some(None),
    }
}

/// One open chat screen.
///
/// Owns both listener handles. Every chat notification cancels the message
/// listener before a new one is created, so at most one is ever live and
/// nothing from a previous chat identity is delivered.
pub struct ChatSession {
    store: Arc<dyn DocumentStore>,
    io: SessionIo,
    user: CurrentUser,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    target: ChatTarget,
    token: CancellationToken,
    state: SessionState,
    chat_listener: Option<Listener>,
    message_listener: Option<Listener>,
    degraded: bool,
    header: Option<ChatHeader>,
    pending: VecDeque<ChatViewUpdate>,
    in_flight: Option<JoinHandle<Step>>,
}

impl ChatSession {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        user: CurrentUser,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
        target: ChatTarget,
        token: CancellationToken,
    ) -> Self {
        let io = SessionIo {
            store: store.clone(),
            uid: user.uid.clone(),
            target: target.clone(),
            window: config.message_window,
        };
        Self {
            store,
            io,
            user,
            clock,
            config,
            target,
            token,
            state: SessionState::Idle,
            chat_listener: None,
            message_listener: None,
            degraded: false,
            header: None,
            pending: VecDeque::new(),
            in_flight: None,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn target(&self) -> &ChatTarget {
        &self.target
    }

    /// Id of the chat currently subscribed to.
    pub fn chat_id(&self) -> Option<&str> {
        match &self.state {
            SessionState::Subscribed(id) => Some(id),
            _ => None,
        }
    }

    pub fn has_message_listener(&self) -> bool {
        self.message_listener.is_some()
    }

    pub fn has_listeners(&self) -> bool {
        self.chat_listener.is_some() || self.message_listener.is_some()
    }

    /// Resolves the chat and opens the chat listener. The outcome is read
    /// through [`next_update`](Self::next_update).
    pub fn open(&mut self) {
        self.teardown();
        self.header = None;
        self.state = SessionState::ResolvingChat;

        match self.target.clone() {
            ChatTarget::Event(event_id) => self.open_event_chat(&event_id),
            ChatTarget::Private(chat_id) => {
                debug!("Opening private chat {} for {}", chat_id, self.user.uid);
                self.chat_listener = Some(self.store.listen(WatchTarget::document(CHATS, &chat_id)));
            }
        }
    }

    fn open_event_chat(&mut self, event_id: &str) {
        match self.store.get(EVENTS, event_id) {
            Ok(Some(_)) => {}
            Ok(None) => {
                return self.finish(
                    SessionState::NotFound,
                    ChatViewUpdate::NotFound {
                        message: EVENT_NOT_FOUND_MESSAGE.to_string(),
                    },
                );
            }
            Err(e) => return self.store_failure(e),
        }

        let gate = AccessGate::new(Roster::new(self.store.clone()));
        match gate.check(event_id, &self.user.uid) {
            Ok(GateDecision::Allowed(_)) => {
                debug!("Opening chat of event {} for {}", event_id, self.user.uid);
                self.chat_listener = Some(
                    self.store
                        .listen(WatchTarget::Query(event_chat_query(event_id))),
                );
            }
            Ok(GateDecision::JoinRequired { event_id }) => self.finish(
                SessionState::AccessRequired,
                ChatViewUpdate::AccessRequired {
                    event_id,
                    message: JOIN_REQUIRED_MESSAGE.to_string(),
                },
            ),
            Err(LobbyError::AccessDenied(reason)) => {
                self.store_failure(StoreError::PermissionDenied(reason))
            }
            Err(e) => {
                warn!("Access check for event {} failed: {}", event_id, e);
                self.finish(
                    SessionState::Failed,
                    ChatViewUpdate::Failed {
                        message: e.user_message(),
                    },
                );
            }
        }
    }

    /// Waits for the next view update. `None` once the session holds no
    /// listener and has nothing left to report.
    ///
    /// Store reads triggered by a notification run on the blocking pool.
    /// Dropping the future mid-await is safe: an unfinished read is picked
    /// up by the next call.
    pub async fn next_update(&mut self) -> Option<ChatViewUpdate> {
        loop {
            if let Some(update) = self.pending.pop_front() {
                return Some(update);
            }
            if let Some(task) = self.in_flight.as_mut() {
                let step = task.await.unwrap_or_else(|e| {
                    Step::Chat(Err(StoreError::Internal(format!("chat update task: {e}"))))
                });
                self.in_flight = None;
                self.apply(step);
                continue;
            }
            if !self.has_listeners() {
                return None;
            }

            let wake = tokio::select! {
                biased;
                _ = self.token.cancelled() => Wake::Cancelled,
                item = next_item(&mut self.chat_listener) => Wake::Chat(item),
                item = next_item(&mut self.message_listener) => Wake::Messages(item),
            };
            if wake.needs_store(self.degraded) {
                let io = self.io.clone();
                let subscribed = self.chat_id().map(str::to_string);
                let degraded = self.degraded;
                self.in_flight = Some(tokio::task::spawn_blocking(move || {
                    io.step(wake, subscribed, degraded)
                }));
            } else {
                self.handle(wake);
            }
        }
    }

    /// Processes whatever is already queued without waiting.
    pub fn try_update(&mut self) -> Option<ChatViewUpdate> {
        loop {
            if let Some(update) = self.pending.pop_front() {
                return Some(update);
            }
            if let Some(task) = self.in_flight.as_mut() {
                let step = match task.now_or_never() {
                    Some(Ok(step)) => step,
                    Some(Err(e)) => {
                        Step::Chat(Err(StoreError::Internal(format!("chat update task: {e}"))))
                    }
                    None => return None,
                };
                self.in_flight = None;
                self.apply(step);
                continue;
            }
            if self.has_listeners() && self.token.is_cancelled() {
                self.handle(Wake::Cancelled);
            } else if let Some(item) = poll_item(&mut self.chat_listener) {
                self.handle(Wake::Chat(item));
            } else if let Some(item) = poll_item(&mut self.message_listener) {
                self.handle(Wake::Messages(item));
            } else {
                return None;
            }
        }
    }

    /// Drains every queued update.
    pub fn drain(&mut self) -> Vec<ChatViewUpdate> {
        std::iter::from_fn(|| self.try_update()).collect()
    }

    /// Cancels both listeners and returns to `Idle`.
    pub fn close(&mut self) {
        self.teardown();
        self.pending.clear();
        self.state = SessionState::Idle;
    }

    fn handle(&mut self, wake: Wake) {
        let step = self
            .io
            .step(wake, self.chat_id().map(str::to_string), self.degraded);
        self.apply(step);
    }

    fn apply(&mut self, step: Step) {
        match step {
            Step::Closed => {
                debug!("Chat session for {} closed", self.user.uid);
                self.finish(SessionState::Idle, ChatViewUpdate::Closed);
            }
            Step::Chat(Err(e)) | Step::MessagesFailed(e) => self.store_failure(e),
            Step::Chat(Ok(ChatStep::Missing)) => {
                if matches!(self.target, ChatTarget::Event(_)) {
                    self.drop_message_listener();
                    self.header = None;
                    self.state = SessionState::Unavailable;
                    self.pending.push_back(ChatViewUpdate::Unavailable {
                        message: CHAT_UNAVAILABLE_MESSAGE.to_string(),
                    });
                } else {
                    self.finish(
                        SessionState::NotFound,
                        ChatViewUpdate::NotFound {
                            message: CHAT_NOT_FOUND_MESSAGE.to_string(),
                        },
                    );
                }
            }
            Step::Chat(Ok(ChatStep::Denied { chat_id })) => {
                warn!("{} is not a member of chat {}", self.user.uid, chat_id);
                self.finish(
                    SessionState::Denied,
                    ChatViewUpdate::Denied {
                        message: DENIED_MESSAGE.to_string(),
                    },
                );
            }
            Step::Chat(Ok(ChatStep::Subscribe {
                chat_id,
                header,
                listener,
                degraded,
            })) => {
                if self.header.as_ref() != Some(&header) {
                    self.header = Some(header.clone());
                    self.pending.push_back(ChatViewUpdate::Header(header));
                }
                // Always a fresh message listener for the chat identity just seen
                self.drop_message_listener();
                self.message_listener = Some(listener);
                self.degraded = degraded;
                self.state = SessionState::Subscribed(chat_id);
            }
            Step::Fallback {
                chat_id,
                error,
                listener,
            } => {
                warn!("Message query for chat {} needs an index: {}", chat_id, error);
                self.pending.push_back(ChatViewUpdate::Notice {
                    message: INDEX_NOTICE.to_string(),
                });
                self.drop_message_listener();
                self.message_listener = Some(listener);
                self.degraded = true;
            }
            Step::Messages(snapshot) => self.on_messages(snapshot),
        }
    }

    fn on_messages(&mut self, snapshot: Snapshot) {
        let mut messages: Vec<Message> = snapshot
            .docs
            .iter()
            .filter_map(|d| match d.decode() {
                Ok(m) => Some(m),
                Err(e) => {
                    warn!("Skipping message {}: {}", d.id, e);
                    None
                }
            })
            .collect();

        if self.degraded {
            messages.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            messages.truncate(self.config.message_window);
        }

        let timeline = build_timeline(messages, self.clock.now(), self.config.offset());
        self.pending.push_back(ChatViewUpdate::Timeline(timeline));
    }

    fn store_failure(&mut self, e: StoreError) {
        if e.is_permission_denied() {
            warn!("Chat access denied for {}: {}", self.user.uid, e);
            self.finish(
                SessionState::Denied,
                ChatViewUpdate::Denied {
                    message: DENIED_MESSAGE.to_string(),
                },
            );
        } else {
            warn!("Chat listener failed for {}: {}", self.user.uid, e);
            self.finish(
                SessionState::Failed,
                ChatViewUpdate::Failed {
                    message: LOAD_FAILED_MESSAGE.to_string(),
                },
            );
        }
    }

    /// Tears down both listeners, enters `state` and queues `update`.
    fn finish(&mut self, state: SessionState, update: ChatViewUpdate) {
        self.teardown();
        self.state = state;
        self.pending.push_back(update);
    }

    fn drop_message_listener(&mut self) {
        if let Some(listener) = self.message_listener.take() {
            listener.cancel();
        }
    }

    fn teardown(&mut self) {
        if let Some(task) = self.in_flight.take() {
            task.abort();
        }
        self.drop_message_listener();
        if let Some(listener) = self.chat_listener.take() {
            listener.cancel();
        }
    }
}

/// Store-facing half of a session. Every call here may block on the store.
#[derive(Clone)]
struct SessionIo {
    store: Arc<dyn DocumentStore>,
    uid: String,
    target: ChatTarget,
    window: usize,
}

impl SessionIo {
    fn step(&self, wake: Wake, subscribed: Option<String>, degraded: bool) -> Step {
        match wake {
            Wake::Cancelled | Wake::Chat(None) | Wake::Messages(None) => Step::Closed,
            Wake::Chat(Some(result)) => {
                Step::Chat(result.and_then(|s| self.resolve_chat(s, subscribed.as_deref(), degraded)))
            }
            Wake::Messages(Some(Ok(snapshot))) => Step::Messages(snapshot),
            Wake::Messages(Some(Err(error))) => match subscribed {
                Some(chat_id) if error.is_missing_index() && !degraded => {
                    let fallback = messages_query(&chat_id, self.window).unordered();
                    let listener = self.store.listen(WatchTarget::Query(fallback));
                    Step::Fallback {
                        chat_id,
                        error,
                        listener,
                    }
                }
                _ => Step::MessagesFailed(error),
            },
        }
    }

    fn resolve_chat(
        &self,
        snapshot: Snapshot,
        subscribed: Option<&str>,
        degraded: bool,
    ) -> StoreResult<ChatStep> {
        if snapshot.len() > 1 {
            warn!(
                "{} chats linked to {:?}, using {}",
                snapshot.len(),
                self.target,
                snapshot.docs[0].id
            );
        }
        let Some(doc) = snapshot.first() else {
            return Ok(ChatStep::Missing);
        };

        let chat: Chat = doc.decode()?;
        if chat.kind == ChatKind::Private && !chat.has_member(&self.uid) {
            return Ok(ChatStep::Denied { chat_id: chat.id });
        }

        // A chat already on the fallback query stays there; the ordered
        // query would only fail again.
        let degraded = degraded && subscribed == Some(chat.id.as_str());
        let mut query = messages_query(&chat.id, self.window);
        if degraded {
            query = query.unordered();
        }

        let header = self.header_for(&chat);
        let listener = self.store.listen(WatchTarget::Query(query));
        Ok(ChatStep::Subscribe {
            chat_id: chat.id,
            header,
            listener,
            degraded,
        })
    }

    fn header_for(&self, chat: &Chat) -> ChatHeader {
        match chat.kind {
            ChatKind::Event => ChatHeader {
                chat_id: chat.id.clone(),
                kind: chat.kind,
                title: chat
                    .title
                    .clone()
                    .unwrap_or_else(|| EVENT_CHAT_TITLE.to_string()),
                member_count: chat.members.len(),
                other_user: None,
            },
            ChatKind::Private => {
                let other = self.other_user(chat);
                ChatHeader {
                    chat_id: chat.id.clone(),
                    kind: chat.kind,
                    title: other.name.clone(),
                    member_count: chat.members.len(),
                    other_user: Some(other),
                }
            }
        }
    }

    /// Display data of the other member: the creation-time snapshot when
    /// present, else the live profile.
    fn other_user(&self, chat: &Chat) -> MemberSnapshot {
        let fallback = MemberSnapshot {
            name: FALLBACK_USER_NAME.to_string(),
            photo: None,
        };
        let Some(other_id) = chat.other_member(&self.uid) else {
            return fallback;
        };

        if let Some(snapshot) = chat.members_data.as_ref().and_then(|m| m.get(other_id)) {
            return MemberSnapshot {
                name: display_name_or_fallback(&snapshot.name),
                photo: snapshot.photo.clone(),
            };
        }

        match self.store.get(USERS, other_id) {
            Ok(Some(doc)) => match doc.decode::<UserProfile>() {
                Ok(profile) => MemberSnapshot {
                    name: display_name_or_fallback(&profile.display_name),
                    photo: profile.photo_url,
                },
                Err(_) => fallback,
            },
            Ok(None) => fallback,
            Err(e) => {
                debug!("Profile of {} unavailable: {}", other_id, e);
                fallback
            }
        }
    }
}
