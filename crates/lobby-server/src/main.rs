use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use lobby_api::middleware::verify_token;
use lobby_api::state::{AppState, AppStateInner};
use lobby_core::{Clock, EngineConfig, SystemClock};
use lobby_db::{DatabaseHandle, default_indexes};
use lobby_gateway::GatewayContext;
use lobby_gateway::connection;

/// Process-wide store handle; opening it twice yields the same database.
static DATABASE: DatabaseHandle = DatabaseHandle::new();

const PLACEHOLDER_SECRETS: [&str; 3] = ["", "dev-secret-change-me", "changeme"];

#[derive(Clone)]
struct ServerState {
    gateway: GatewayContext,
    jwt_secret: String,
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lobby=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret = std::env::var("LOBBY_JWT_SECRET").unwrap_or_default();
    if PLACEHOLDER_SECRETS.contains(&jwt_secret.trim()) {
        anyhow::bail!("LOBBY_JWT_SECRET must be set to a real secret");
    }
    let db_path = std::env::var("LOBBY_DB_PATH").unwrap_or_else(|_| "lobby.db".into());
    let host = std::env::var("LOBBY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("LOBBY_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let config = EngineConfig::from_env();
    info!(
        "Engine config: quota {}/day, window {} messages, UTC{:+} min",
        config.daily_event_quota, config.message_window, config.utc_offset_minutes
    );

    // Init database
    let db = DATABASE.get_or_open(&PathBuf::from(&db_path), default_indexes())?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Shared state
    let app_state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        jwt_secret: jwt_secret.clone(),
        clock: clock.clone(),
        config: config.clone(),
    });
    let state = ServerState {
        gateway: GatewayContext {
            connector: Arc::new(db),
            clock,
            config,
        },
        jwt_secret,
    };

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    let app = Router::new()
        .merge(lobby_api::routes(app_state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Lobby server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Token is checked before the upgrade; browsers cannot set headers on a
/// WebSocket handshake, so it travels in the query string.
async fn ws_upgrade(
    State(state): State<ServerState>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(claims) = verify_token(&state.jwt_secret, &query.token) else {
        warn!("Gateway connection refused: invalid token");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    ws.on_upgrade(move |socket| {
        connection::handle_connection_authenticated(socket, state.gateway, claims)
    })
}
