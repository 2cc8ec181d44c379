use axum::{middleware, routing::get, routing::post, routing::put, Router};

use crate::auth::middleware::JwtSecret;
use crate::chat::presence;
use crate::history::routes as history;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Authenticated routes (JWT required, Claims extractor validates token).
    // /contacts, /chats, /send and /read MUST come before /{user_id}.
    let message_routes = Router::new()
        .route("/api/messages/contacts", get(history::get_contacts))
        .route("/api/messages/chats", get(history::get_chat_partners))
        .route("/api/messages/send/{user_id}", post(history::send_message))
        .route("/api/messages/read/{user_id}", put(history::mark_conversation_read))
        .route("/api/messages/{user_id}", get(history::get_conversation));

    let presence_routes = Router::new().route("/api/presence", get(presence::get_presence));

    // WebSocket endpoint (auth via query param, not JWT header)
    let ws_routes = Router::new().route("/ws", get(ws_handler::ws_upgrade));

    let health = Router::new().route("/health", get(health_check));

    Router::new()
        .merge(message_routes)
        .merge(presence_routes)
        .merge(ws_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
