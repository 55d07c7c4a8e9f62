use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tracing::{info, trace, warn};

use lobby_types::api::Claims;
use lobby_types::events::{GatewayCommand, GatewayEvent};

use crate::views::{GatewayContext, ViewHost};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

enum Wake {
    Socket(Option<Result<Message, axum::Error>>),
    View(GatewayEvent),
    Heartbeat,
}

async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &GatewayEvent) -> bool {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to encode gateway event: {}", e);
            return true;
        }
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}

/// Handle a pre-authenticated WebSocket connection. The token was checked
/// at the HTTP upgrade, so the client goes straight to Ready.
pub async fn handle_connection_authenticated(socket: WebSocket, ctx: GatewayContext, claims: Claims) {
    let (mut sender, mut receiver) = socket.split();
    let user_id = claims.sub.clone();

    let mut host = match ViewHost::sign_in(&ctx, claims).await {
        Ok(host) => host,
        Err(e) => {
            warn!("{} could not be signed in: {}", user_id, e);
            let event = GatewayEvent::Error {
                message: e.user_message(),
            };
            let _ = send_event(&mut sender, &event).await;
            return;
        }
    };
    let username = host.user().display_name.clone();
    info!("{} ({}) connected to gateway", username, user_id);

    let ready = GatewayEvent::Ready {
        user_id: user_id.clone(),
        display_name: username.clone(),
    };
    if send_event(&mut sender, &ready).await {
        run_connection_loop(&mut sender, &mut receiver, &mut host).await;
    }

    host.shutdown();
    info!("{} ({}) disconnected from gateway", username, user_id);
}

async fn run_connection_loop(
    sender: &mut SplitSink<WebSocket, Message>,
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    host: &mut ViewHost,
) {
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut pong_received = true;
    let mut missed_heartbeats: u8 = 0;

    loop {
        let wake = tokio::select! {
            msg = receiver.next() => Wake::Socket(msg),
            event = host.next_event() => Wake::View(event),
            _ = heartbeat.tick() => Wake::Heartbeat,
        };

        match wake {
            Wake::Socket(Some(Ok(Message::Text(text)))) => {
                match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        trace!("{} command: {:?}", host.user().uid, cmd);
                        if let Some(reply) = host.apply(cmd).await {
                            if !send_event(sender, &reply).await {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(
                            "{} bad command: {} -- raw: {}",
                            host.user().uid,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                }
            }
            Wake::Socket(Some(Ok(Message::Pong(_)))) => pong_received = true,
            Wake::Socket(Some(Ok(Message::Close(_)))) | Wake::Socket(Some(Err(_))) | Wake::Socket(None) => break,
            Wake::Socket(Some(Ok(_))) => {}
            Wake::View(event) => {
                if !send_event(sender, &event).await {
                    break;
                }
            }
            Wake::Heartbeat => {
                if std::mem::replace(&mut pong_received, false) {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= 2 {
                        warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                        break;
                    }
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }
}
