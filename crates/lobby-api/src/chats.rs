use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use lobby_core::SendOutcome;
use lobby_types::api::{Claims, SendMessageRequest, SendMessageResponse, StartChatResponse};

use crate::error::ApiError;
use crate::state::{AppState, with_lobby};

/// Opens (or creates) the private chat with `user_id`.
pub async fn start_chat(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let (chat, created) =
        with_lobby(&state, claims, move |lobby| lobby.start_private_chat(&user_id)).await?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((
        status,
        Json(StartChatResponse {
            chat_id: chat.id,
            created,
        }),
    ))
}

pub async fn inbox(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = with_lobby(&state, claims, |lobby| lobby.inbox_snapshot()).await?;
    Ok(Json(snapshot))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome =
        with_lobby(&state, claims, move |lobby| lobby.send_message(&chat_id, &req.text)).await?;

    match outcome {
        SendOutcome::Sent {
            message_id,
            summary_stale,
        } => Ok((
            StatusCode::CREATED,
            Json(SendMessageResponse {
                message_id,
                summary_stale,
            }),
        )
            .into_response()),
        SendOutcome::Ignored => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}
