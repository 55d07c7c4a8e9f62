use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use lobby_db::{Auth, DocumentStore, StoreConnector};
use lobby_types::collections::USERS;
use lobby_types::models::{CurrentUser, UserProfile};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::LobbyResult;
use crate::Lobby;

/// Membership facts learned during the current identity's session.
pub(crate) type MembershipCache = Arc<Mutex<HashMap<String, bool>>>;

/// Merges identity claims with the stored profile. Profile values win when
/// present; a missing profile is not an error.
pub fn resolve_user(
    store: &dyn DocumentStore,
    uid: &str,
    name: &str,
    photo: Option<String>,
) -> LobbyResult<CurrentUser> {
    let profile = store
        .get(USERS, uid)?
        .map(|d| d.decode::<UserProfile>())
        .transpose()?
        .unwrap_or_default();

    let display_name = if profile.display_name.trim().is_empty() {
        name.to_string()
    } else {
        profile.display_name
    };

    Ok(CurrentUser {
        uid: uid.to_string(),
        display_name,
        photo_url: profile.photo_url.or(photo),
        company: profile.company,
        job_title: profile.job_title,
    })
}

struct ScopeState {
    token: CancellationToken,
    store: Option<Arc<dyn DocumentStore>>,
    memberships: MembershipCache,
}

/// Holds everything tied to the signed-in identity. Changing identity
/// cancels every view, detaches every listener and forgets cached
/// memberships before anything runs as the new user.
pub struct IdentityScope {
    connector: Arc<dyn StoreConnector>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    current: watch::Sender<Option<CurrentUser>>,
    state: Mutex<ScopeState>,
}

impl IdentityScope {
    pub fn new(connector: Arc<dyn StoreConnector>, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            connector,
            clock,
            config,
            current,
            state: Mutex::new(ScopeState {
                token: CancellationToken::new(),
                store: None,
                memberships: MembershipCache::default(),
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<CurrentUser>> {
        self.current.subscribe()
    }

    pub fn current(&self) -> Option<CurrentUser> {
        self.current.borrow().clone()
    }

    /// Signs in `uid` and returns the engine bound to them.
    pub fn sign_in(&self, uid: &str, name: &str, photo: Option<String>) -> LobbyResult<Lobby> {
        self.reset();

        let store = self.connector.connect(Auth::User(uid.to_string()));
        let user = resolve_user(store.as_ref(), uid, name, photo)?;

        let memberships = {
            let mut state = self.lock_state();
            state.store = Some(store.clone());
            state.memberships.clone()
        };

        info!("Identity scope bound to {}", uid);
        self.current.send_replace(Some(user.clone()));
        Ok(Lobby::with_cache(store, user, self.clock.clone(), self.config.clone(), memberships))
    }

    pub fn sign_out(&self) {
        self.reset();
        self.current.send_replace(None);
    }

    /// Token for a view living under the current identity. Cancelled on the
    /// next identity change.
    pub fn view_token(&self) -> CancellationToken {
        self.lock_state().token.child_token()
    }

    /// Hard reset: cancel views, detach listeners, drop cached state.
    pub fn reset(&self) {
        let mut state = self.lock_state();
        state.token.cancel();
        state.token = CancellationToken::new();
        if let Some(store) = state.store.take() {
            store.detach_all();
        }
        let poisoned = match state.memberships.lock() {
            Ok(mut cache) => {
                cache.clear();
                false
            }
            Err(_) => true,
        };
        if poisoned {
            warn!("Membership cache poisoned, replacing it");
            state.memberships = MembershipCache::default();
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ScopeState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::clock::SystemClock;
    use lobby_db::{Database, Query, WatchTarget, default_indexes};

    fn scope() -> (Arc<Database>, IdentityScope) {
        let db = Arc::new(Database::open_in_memory(default_indexes()).unwrap());
        let scope = IdentityScope::new(
            Arc::new(db.clone()),
            Arc::new(SystemClock),
            EngineConfig::default(),
        );
        (db, scope)
    }

    #[test]
    fn test_profile_overrides_claims() {
        let (db, scope) = scope();
        db.admin()
            .create(
                USERS,
                "u1",
                json!({ "displayName": "Camille", "company": "Acme", "photoURL": "c.png" })
                    .as_object()
                    .cloned()
                    .unwrap(),
            )
            .unwrap();

        let lobby = scope.sign_in("u1", "claims name", None).unwrap();
        assert_eq!(lobby.user().display_name, "Camille");
        assert_eq!(lobby.user().company, "Acme");
        assert_eq!(lobby.user().photo_url.as_deref(), Some("c.png"));
    }

    #[test]
    fn test_missing_profile_falls_back_to_claims() {
        let (_db, scope) = scope();
        let lobby = scope.sign_in("u2", "Sam", Some("s.png".into())).unwrap();
        assert_eq!(lobby.user().display_name, "Sam");
        assert_eq!(lobby.user().photo_url.as_deref(), Some("s.png"));
    }

    #[test]
    fn test_reset_cancels_views_and_detaches_listeners() {
        let (db, scope) = scope();
        let lobby = scope.sign_in("u1", "A", None).unwrap();
        let token = scope.view_token();
        let _listener = lobby.store().listen(WatchTarget::Query(Query::collection(USERS)));
        lobby.remember_membership("e1", true);
        assert_eq!(db.active_listeners(), 1);

        let mut rx = scope.subscribe();
        scope.sign_out();

        assert!(token.is_cancelled());
        assert_eq!(db.active_listeners(), 0);
        assert_eq!(lobby.known_membership("e1"), None);
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_none());
        assert!(scope.current().is_none());

        // Tokens handed out afterwards belong to the next identity
        assert!(!scope.view_token().is_cancelled());
    }

    #[test]
    fn test_reset_replaces_poisoned_membership_cache() {
        let (_db, scope) = scope();
        let lobby = scope.sign_in("u1", "A", None).unwrap();
        let cache = lobby.memberships.clone();
        let _ = std::thread::spawn(move || {
            let _guard = cache.lock().unwrap();
            panic!("holder died");
        })
        .join();
        assert!(lobby.memberships.is_poisoned());

        scope.sign_out();
        let next = scope.sign_in("u1", "A", None).unwrap();
        assert!(!next.memberships.is_poisoned());
        next.remember_membership("e1", true);
        assert_eq!(next.known_membership("e1"), Some(true));
    }
}
