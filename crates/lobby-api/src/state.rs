use std::sync::Arc;

use tracing::error;

use lobby_core::identity::resolve_user;
use lobby_core::{Clock, EngineConfig, Lobby, LobbyResult};
use lobby_db::{Auth, Database, StoreConnector};
use lobby_types::api::Claims;

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub clock: Arc<dyn Clock>,
    pub config: EngineConfig,
}

impl AppStateInner {
    /// Engine bound to the caller. Reads the caller's profile, so it must
    /// run off the async runtime.
    pub fn lobby_for(&self, claims: &Claims) -> LobbyResult<Lobby> {
        let store = self.db.connect(Auth::User(claims.sub.clone()));
        let user = resolve_user(store.as_ref(), &claims.sub, &claims.name, claims.photo.clone())?;
        Ok(Lobby::new(store, user, self.clock.clone(), self.config.clone()))
    }
}

/// Runs `f` against the caller's engine on the blocking pool.
pub async fn with_lobby<T, F>(state: &AppState, claims: Claims, f: F) -> Result<T, ApiError>
where
    F: FnOnce(Lobby) -> LobbyResult<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || {
        let lobby = state.lobby_for(&claims)?;
        f(lobby)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal
    })?
    .map_err(ApiError::from)
}
