use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use lobby_types::api::{
    Claims, CreateEventResponse, DiscoveryQuery, EventDraft, EventListResponse, HotelSearchQuery,
    JoinEventResponse,
};

use crate::error::ApiError;
use crate::state::{AppState, with_lobby};

pub async fn create_event(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(draft): Json<EventDraft>,
) -> Result<impl IntoResponse, ApiError> {
    let event_id = with_lobby(&state, claims, move |lobby| lobby.create_event(&draft)).await?;
    Ok((StatusCode::CREATED, Json(CreateEventResponse { event_id })))
}

/// Public discovery listing.
pub async fn list_events(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<DiscoveryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    // Lookup-key repairs run detached; the listing does not wait for them
    let listing = with_lobby(&state, claims, move |lobby| {
        lobby.upcoming_events(query.window, query.theme, query.place.as_deref())
    })
    .await?;
    Ok(Json(EventListResponse {
        events: listing.events,
    }))
}

pub async fn search_events(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<HotelSearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let listing = with_lobby(&state, claims, move |lobby| lobby.search_events(&query.hotel)).await?;
    Ok(Json(EventListResponse {
        events: listing.events,
    }))
}

pub async fn get_event(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let detail = with_lobby(&state, claims, move |lobby| lobby.event_detail(&event_id)).await?;
    Ok(Json(detail))
}

pub async fn join_event(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let participant_id = with_lobby(&state, claims, move |lobby| lobby.join_event(&event_id)).await?;
    Ok((StatusCode::CREATED, Json(JoinEventResponse { participant_id })))
}

pub async fn leave_event(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    with_lobby(&state, claims, move |lobby| lobby.leave_event(&event_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Public events organized by a user, for their profile page.
pub async fn user_events(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let events = with_lobby(&state, claims, move |lobby| lobby.organizer_events(&user_id)).await?;
    Ok(Json(EventListResponse { events }))
}
