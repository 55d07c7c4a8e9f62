use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use lobby_db::{
    Direction, DocumentStore, Listener, Query, Snapshot, StoreError, StoreResult, TryRecvError,
    WatchTarget,
};
use lobby_types::collections::CHATS;
use lobby_types::models::{Chat, ChatKind, CurrentUser};
use lobby_types::view::{InboxEntry, InboxSnapshot};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{LobbyError, LobbyResult};
use crate::linkage::{FALLBACK_USER_NAME, display_name_or_fallback};
use crate::timeline::relative_label;

const INDEX_NOTICE: &str =
    "Index de base de données manquant : l'ordre des conversations peut être approximatif";
const EVENT_FALLBACK_TITLE: &str = "Événement";

/// Chats of `kind` that `uid` belongs to, most recently active first.
pub fn inbox_query(uid: &str, kind: ChatKind) -> Query {
    Query::collection(CHATS)
        .where_eq("type", kind.as_str())
        .where_contains("members", uid)
        .order_by("lastMessageAt", Direction::Desc)
}

fn sort_by_activity(chats: &mut [Chat]) {
    chats.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
}

fn entry_for(chat: &Chat, viewer: &str, now: DateTime<Utc>, config: &EngineConfig) -> InboxEntry {
    let (title, photo) = match chat.kind {
        ChatKind::Event => (
            chat.title
                .clone()
                .unwrap_or_else(|| EVENT_FALLBACK_TITLE.to_string()),
            None,
        ),
        ChatKind::Private => {
            let other = chat
                .other_member(viewer)
                .and_then(|id| chat.members_data.as_ref()?.get(id));
            match other {
                Some(snapshot) => (display_name_or_fallback(&snapshot.name), snapshot.photo.clone()),
                None => (FALLBACK_USER_NAME.to_string(), None),
            }
        }
    };

    InboxEntry {
        chat_id: chat.id.clone(),
        kind: chat.kind,
        event_id: chat.event_id.clone(),
        title,
        photo,
        last_message: chat.last_message.clone(),
        last_message_sender: chat.last_message_sender.clone(),
        time_label: chat
            .last_message_at
            .map(|at| relative_label(at, now, config.offset()))
            .unwrap_or_default(),
    }
}

fn decode_chats(snapshot: &Snapshot) -> Vec<Chat> {
    snapshot
        .docs
        .iter()
        .filter_map(|d| match d.decode() {
            Ok(chat) => Some(chat),
            Err(e) => {
                warn!("Skipping chat {}: {}", d.id, e);
                None
            }
        })
        .collect()
}

/// One-shot inbox read, with the same index fallback as the live view.
pub fn snapshot_once(
    store: &dyn DocumentStore,
    user: &CurrentUser,
    now: DateTime<Utc>,
    config: &EngineConfig,
) -> LobbyResult<InboxSnapshot> {
    let mut inbox = InboxSnapshot::default();
    for kind in [ChatKind::Event, ChatKind::Private] {
        let query = inbox_query(&user.uid, kind);
        let mut chats = match store.query(&query) {
            Ok(snapshot) => decode_chats(&snapshot),
            Err(e) if e.is_missing_index() => {
                warn!("Inbox query needs an index: {}", e);
                inbox.notice = Some(INDEX_NOTICE.to_string());
                let mut chats = decode_chats(&store.query(&query.unordered())?);
                sort_by_activity(&mut chats);
                chats
            }
            Err(e) => return Err(LobbyError::from(e)),
        };
        // Store ordering already holds, this only pins down ties
        sort_by_activity(&mut chats);
        let entries: Vec<InboxEntry> = chats
            .iter()
            .map(|c| entry_for(c, &user.uid, now, config))
            .collect();
        match kind {
            ChatKind::Event => inbox.event_chats = entries,
            ChatKind::Private => inbox.private_chats = entries,
        }
    }
    Ok(inbox)
}

struct Section {
    kind: ChatKind,
    listener: Option<Listener>,
    degraded: bool,
    chats: Vec<Chat>,
}

impl Section {
    fn new(kind: ChatKind) -> Self {
        Self {
            kind,
            listener: None,
            degraded: false,
            chats: Vec::new(),
        }
    }
}

enum Wake {
    Cancelled,
    Section(usize, Option<StoreResult<Snapshot>>),
}

/// Fallback listener being opened on the blocking pool.
struct PendingFallback {
    index: usize,
    error: StoreError,
    task: JoinHandle<Listener>,
}

/// Live chat list: one listener per chat kind.
pub struct InboxView {
    store: Arc<dyn DocumentStore>,
    user: CurrentUser,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    token: CancellationToken,
    sections: [Section; 2],
    notice: Option<String>,
    failed: Option<StoreError>,
    fallback: Option<PendingFallback>,
}

impl InboxView {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        user: CurrentUser,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
        token: CancellationToken,
    ) -> Self {
        Self {
            store,
            user,
            clock,
            config,
            token,
            sections: [Section::new(ChatKind::Event), Section::new(ChatKind::Private)],
            notice: None,
            failed: None,
            fallback: None,
        }
    }

    pub fn open(&mut self) {
        for section in &mut self.sections {
            let query = inbox_query(&self.user.uid, section.kind);
            section.degraded = false;
            section.listener = Some(self.store.listen(WatchTarget::Query(query)));
        }
    }

    pub fn close(&mut self) {
        if let Some(pending) = self.fallback.take() {
            pending.task.abort();
        }
        for section in &mut self.sections {
            if let Some(listener) = section.listener.take() {
                listener.cancel();
            }
        }
    }

    fn is_open(&self) -> bool {
        self.sections.iter().any(|s| s.listener.is_some())
    }

    /// The error that stopped the view, if any.
    pub fn failure(&self) -> Option<&StoreError> {
        self.failed.as_ref()
    }

    /// Waits for a change and returns the whole inbox. `None` once closed.
    /// Safe to drop mid-await.
    pub async fn next_snapshot(&mut self) -> Option<InboxSnapshot> {
        loop {
            if let Some(pending) = self.fallback.as_mut() {
                let opened = (&mut pending.task).await;
                let Some(PendingFallback { index, error, .. }) = self.fallback.take() else {
                    continue;
                };
                match opened {
                    Ok(listener) => return Some(self.degrade(index, &error, listener)),
                    Err(e) => {
                        warn!("Inbox fallback for {} not opened: {}", self.user.uid, e);
                        self.failed = Some(StoreError::Internal(e.to_string()));
                        self.close();
                        return None;
                    }
                }
            }
            if !self.is_open() {
                return None;
            }
            let [events, privates] = &mut self.sections;
            let wake = tokio::select! {
                biased;
                _ = self.token.cancelled() => Wake::Cancelled,
                item = next_item(&mut events.listener) => Wake::Section(0, item),
                item = next_item(&mut privates.listener) => Wake::Section(1, item),
            };

            // Opening the fallback reads the store, so it runs off the worker
            let wake = match wake {
                Wake::Section(index, Some(Err(error)))
                    if error.is_missing_index() && !self.sections[index].degraded =>
                {
                    let store = self.store.clone();
                    let query = inbox_query(&self.user.uid, self.sections[index].kind).unordered();
                    let task = tokio::task::spawn_blocking(move || {
                        store.listen(WatchTarget::Query(query))
                    });
                    self.fallback = Some(PendingFallback { index, error, task });
                    continue;
                }
                other => other,
            };
            if let Some(snapshot) = self.handle(wake) {
                return Some(snapshot);
            }
        }
    }

    /// Processes queued notifications without waiting and returns the latest
    /// inbox if anything changed.
    pub fn try_snapshot(&mut self) -> Option<InboxSnapshot> {
        let mut latest = None;
        loop {
            if self.is_open() && self.token.is_cancelled() {
                self.handle(Wake::Cancelled);
                return latest;
            }
            let mut progressed = false;
            for index in 0..self.sections.len() {
                let item = match self.sections[index].listener.as_mut().map(Listener::try_recv) {
                    Some(Ok(item)) => Some(item),
                    Some(Err(TryRecvError::Disconnected)) => None,
                    Some(Err(TryRecvError::Empty)) | None => continue,
                };
                progressed = true;
                if let Some(snapshot) = self.handle(Wake::Section(index, item)) {
                    latest = Some(snapshot);
                }
            }
            if !progressed {
                return latest;
            }
        }
    }

    fn handle(&mut self, wake: Wake) -> Option<InboxSnapshot> {
        let (index, item) = match wake {
            Wake::Cancelled => {
                self.close();
                return None;
            }
            Wake::Section(index, item) => (index, item),
        };

        match item {
            None => {
                self.close();
                None
            }
            Some(Ok(snapshot)) => {
                let section = &mut self.sections[index];
                section.chats = decode_chats(&snapshot);
                if section.degraded {
                    sort_by_activity(&mut section.chats);
                }
                Some(self.render())
            }
            Some(Err(e)) if e.is_missing_index() && !self.sections[index].degraded => {
                let fallback = inbox_query(&self.user.uid, self.sections[index].kind).unordered();
                let listener = self.store.listen(WatchTarget::Query(fallback));
                Some(self.degrade(index, &e, listener))
            }
            Some(Err(e)) => {
                warn!("Inbox listener failed for {}: {}", self.user.uid, e);
                self.failed = Some(e);
                self.close();
                None
            }
        }
    }

    /// Switches a section to its unordered fallback listener.
    fn degrade(&mut self, index: usize, error: &StoreError, listener: Listener) -> InboxSnapshot {
        warn!("Inbox listener needs an index: {}", error);
        self.notice = Some(INDEX_NOTICE.to_string());
        let section = &mut self.sections[index];
        section.degraded = true;
        section.listener = Some(listener);
        self.render()
    }

    fn render(&self) -> InboxSnapshot {
        let now = self.clock.now();
        let entries = |section: &Section| -> Vec<InboxEntry> {
            section
                .chats
                .iter()
                .map(|c| entry_for(c, &self.user.uid, now, &self.config))
                .collect()
        };
        InboxSnapshot {
            event_chats: entries(&self.sections[0]),
            private_chats: entries(&self.sections[1]),
            notice: self.notice.clone(),
        }
    }
}

async fn next_item(listener: &mut Option<Listener>) -> Option<StoreResult<Snapshot>> {
    match listener {
        Some(l) => l.next().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::TimeZone;

    use super::*;
    use lobby_types::models::MemberSnapshot;

    fn chat(id: &str, kind: ChatKind, last: Option<DateTime<Utc>>) -> Chat {
        Chat {
            id: id.into(),
            kind,
            event_id: None,
            title: None,
            members: vec!["me".into(), "you".into()],
            members_data: None,
            last_message: None,
            last_message_at: last,
            last_message_sender: None,
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_private_entry_uses_member_snapshot() {
        let now = Utc.with_ymd_and_hms(2026, 10, 12, 18, 0, 0).unwrap();
        let mut c = chat("c1", ChatKind::Private, Some(now));
        let mut data = BTreeMap::new();
        data.insert(
            "you".to_string(),
            MemberSnapshot {
                name: "Inès".into(),
                photo: Some("p.jpg".into()),
            },
        );
        c.members_data = Some(data);

        let entry = entry_for(&c, "me", now, &EngineConfig::default());
        assert_eq!(entry.title, "Inès");
        assert_eq!(entry.photo.as_deref(), Some("p.jpg"));
        assert_eq!(entry.time_label, "18:00");
    }

    #[test]
    fn test_private_entry_without_snapshot_uses_fallback() {
        let now = Utc.with_ymd_and_hms(2026, 10, 12, 18, 0, 0).unwrap();
        let entry = entry_for(&chat("c1", ChatKind::Private, None), "me", now, &EngineConfig::default());
        assert_eq!(entry.title, FALLBACK_USER_NAME);
        assert_eq!(entry.time_label, "");
    }

    #[test]
    fn test_sort_by_activity_puts_silent_chats_last() {
        let t = Utc.with_ymd_and_hms(2026, 10, 12, 18, 0, 0).unwrap();
        let mut chats = vec![
            chat("silent", ChatKind::Event, None),
            chat("old", ChatKind::Event, Some(t)),
            chat("new", ChatKind::Event, Some(t + chrono::Duration::minutes(1))),
        ];
        sort_by_activity(&mut chats);
        let ids: Vec<_> = chats.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old", "silent"]);
    }
}
