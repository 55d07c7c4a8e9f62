pub mod chats;
pub mod error;
pub mod events;
pub mod middleware;
pub mod state;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

use crate::middleware::require_auth;
use crate::state::AppState;

async fn health() -> &'static str {
    "ok"
}

/// REST routes. Everything except `/health` requires a bearer token.
pub fn routes(state: AppState) -> Router {
    let protected = Router::new()
        .route("/events", post(events::create_event).get(events::list_events))
        .route("/events/search", get(events::search_events))
        .route("/events/{event_id}", get(events::get_event))
        .route("/events/{event_id}/join", post(events::join_event))
        .route("/events/{event_id}/leave", post(events::leave_event))
        .route("/users/{user_id}/events", get(events::user_events))
        .route("/users/{user_id}/chat", post(chats::start_chat))
        .route("/chats", get(chats::inbox))
        .route("/chats/{chat_id}/messages", post(chats::send_message))
        .layer(axum_middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new().route("/health", get(health)).merge(protected)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use chrono::{TimeZone, Utc};
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::state::AppStateInner;
    use lobby_core::{EngineConfig, ManualClock};
    use lobby_db::{Database, default_indexes};
    use lobby_types::api::Claims;

    const SECRET: &str = "test-secret";

    fn app() -> Router {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap());
        routes(Arc::new(AppStateInner {
            db: Arc::new(Database::open_in_memory(default_indexes()).unwrap()),
            jwt_secret: SECRET.into(),
            clock: Arc::new(clock),
            config: EngineConfig::default(),
        }))
    }

    fn token(uid: &str, name: &str) -> String {
        let claims = Claims {
            sub: uid.into(),
            name: name.into(),
            photo: None,
            exp: 4_102_444_800,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    fn request(method: &str, uri: &str, bearer: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(t) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn draft() -> Value {
        json!({
            "title": "Apéro rooftop",
            "hotel": { "name": "Hôtel du Parc", "city": "Lyon" },
            "eventDate": "2026-06-10",
            "eventTime": "19:00:00",
            "thematique": "apero"
        })
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let (status, _) = call(&app(), request("GET", "/health", None, None)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_requires_valid_token() {
        let app = app();
        let (status, _) = call(&app, request("GET", "/chats", None, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(&app, request("GET", "/chats", Some("garbage"), None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_create_join_and_detail() {
        let app = app();
        let alice = token("alice", "Alice");
        let bob = token("bob", "Bob");

        let (status, body) = call(&app, request("POST", "/events", Some(&alice), Some(draft()))).await;
        assert_eq!(status, StatusCode::CREATED);
        let event_id = body["eventId"].as_str().unwrap().to_string();

        let join = format!("/events/{event_id}/join");
        let (status, body) = call(&app, request("POST", &join, Some(&bob), None)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["participantId"], format!("{event_id}_bob"));

        let (status, body) = call(&app, request("POST", &join, Some(&bob), None)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "already-joined");

        let (status, body) = call(&app, request("GET", &format!("/events/{event_id}"), Some(&bob), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["event"]["participantsCount"], 2);
        assert_eq!(body["myParticipation"]["role"], "participant");

        let leave = format!("/events/{event_id}/leave");
        let (status, body) = call(&app, request("POST", &leave, Some(&alice), None)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "organizer-cannot-leave");
    }

    #[tokio::test]
    async fn test_invalid_draft_is_bad_request() {
        let app = app();
        let mut body = draft();
        body["title"] = json!("  ");
        let (status, body) =
            call(&app, request("POST", "/events", Some(&token("alice", "Alice")), Some(body))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation");
    }

    #[tokio::test]
    async fn test_private_chat_and_message() {
        let app = app();
        let alice = token("alice", "Alice");
        let bob = token("bob", "Bob");

        let (status, body) = call(&app, request("POST", "/users/bob/chat", Some(&alice), None)).await;
        assert_eq!(status, StatusCode::CREATED);
        let chat_id = body["chatId"].as_str().unwrap().to_string();

        let (status, body) = call(&app, request("POST", "/users/alice/chat", Some(&bob), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["chatId"], chat_id);

        let uri = format!("/chats/{chat_id}/messages");
        let (status, body) =
            call(&app, request("POST", &uri, Some(&bob), Some(json!({ "text": "Salut" })))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["summaryStale"], false);

        let (status, body) = call(&app, request("GET", "/chats", Some(&alice), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["privateChats"][0]["lastMessage"], "Salut");

        let outsider = token("carol", "Carol");
        let (status, _) =
            call(&app, request("POST", &uri, Some(&outsider), Some(json!({ "text": "Hé" })))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
