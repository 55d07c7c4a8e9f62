use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{error, warn};

use lobby_core::LobbyError;
use lobby_types::api::ErrorResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Lobby(#[from] LobbyError),

    #[error("internal error")]
    Internal,
}

/// HTTP status for an engine error.
pub fn status_for(e: &LobbyError) -> StatusCode {
    match e {
        LobbyError::Validation(_) => StatusCode::BAD_REQUEST,
        LobbyError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
        LobbyError::Capacity { .. }
        | LobbyError::AlreadyJoined
        | LobbyError::OrganizerCannotLeave => StatusCode::CONFLICT,
        LobbyError::NotFound { .. } => StatusCode::NOT_FOUND,
        LobbyError::AccessRequired { .. } | LobbyError::AccessDenied(_) => StatusCode::FORBIDDEN,
        LobbyError::PartialWrite { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        LobbyError::Configuration(_) | LobbyError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Self::Lobby(e) => {
                let status = status_for(e);
                if status.is_server_error() {
                    error!("Request failed: {}", e);
                } else {
                    warn!("Request rejected: {}", e);
                }
                (
                    status,
                    ErrorResponse {
                        error: e.code().to_string(),
                        message: e.user_message(),
                    },
                )
            }
            Self::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse {
                    error: "internal".into(),
                    message: "Erreur interne du serveur".into(),
                },
            ),
        };
        (status, Json(body)).into_response()
    }
}
