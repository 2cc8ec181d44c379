//! REST endpoints over message history: contacts, chat list, paginated
//! conversations, and the HTTP twins of submit and mark-read.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::config::MAX_HISTORY_PAGE;
use crate::history::{run_blocking, ChatPartner, HistoryError, Message, UserProfile};
use crate::state::AppState;

// --- Request / Response types ---

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Message id cursor: only older messages are returned
    pub before: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub messages: Vec<Message>,
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub attachment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    pub message_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    /// Messages whose status changed to read by this call
    pub message_ids: Vec<String>,
}

fn history_failure(err: HistoryError) -> (StatusCode, String) {
    tracing::error!(error = %err, "History query failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "History unavailable".to_string(),
    )
}

async fn require_user(state: &AppState, user_id: &str) -> Result<UserProfile, (StatusCode, String)> {
    let id = user_id.to_string();
    run_blocking(&state.history, move |store| store.user(&id))
        .await
        .map_err(history_failure)?
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Unknown user: {}", user_id)))
}

// --- Handlers ---

/// GET /api/messages/contacts
/// Every user except the caller. JWT auth required.
pub async fn get_contacts(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<UserProfile>>, (StatusCode, String)> {
    let contacts = run_blocking(&state.history, move |store| store.contacts(&claims.sub))
        .await
        .map_err(history_failure)?;
    Ok(Json(contacts))
}

/// GET /api/messages/chats
/// Users the caller has exchanged messages with, most recent first.
pub async fn get_chat_partners(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<ChatPartner>>, (StatusCode, String)> {
    let partners = run_blocking(&state.history, move |store| store.chat_partners(&claims.sub))
        .await
        .map_err(history_failure)?;
    Ok(Json(partners))
}

/// GET /api/messages/{user_id}?before=&limit=
/// One page of the conversation with `user_id`, oldest first.
pub async fn get_conversation(
    State(state): State<AppState>,
    claims: Claims,
    Path(other_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, (StatusCode, String)> {
    require_user(&state, &other_id).await?;

    let limit = query
        .limit
        .unwrap_or(state.history_page_limit)
        .clamp(1, MAX_HISTORY_PAGE);

    // One extra row tells us whether an older page exists
    let mut messages = run_blocking(&state.history, move |store| {
        store.conversation(&claims.sub, &other_id, query.before.as_deref(), limit + 1)
    })
    .await
    .map_err(history_failure)?;

    let has_more = messages.len() > limit as usize;
    if has_more {
        messages.remove(0);
    }

    Ok(Json(HistoryResponse { messages, has_more }))
}

/// POST /api/messages/send/{user_id}
/// Same path as a live `submit-message`: persist, then push if the
/// recipient is connected.
pub async fn send_message(
    State(state): State<AppState>,
    claims: Claims,
    Path(receiver_id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>), (StatusCode, String)> {
    let message = state
        .delivery
        .submit(&claims.sub, &receiver_id, body.text, body.attachment)
        .await
        .map_err(|e| (e.status_code(), e.to_string()))?;

    Ok((StatusCode::CREATED, Json(message)))
}

/// PUT /api/messages/read/{user_id}
/// Mark messages from `user_id` to the caller as read. An empty body covers
/// every unread message; `{"message_ids": [...]}` narrows it.
pub async fn mark_conversation_read(
    State(state): State<AppState>,
    claims: Claims,
    Path(sender_id): Path<String>,
    body: Bytes,
) -> Result<Json<MarkReadResponse>, (StatusCode, String)> {
    let message_ids = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        let request: MarkReadRequest = serde_json::from_slice(&body)
            .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid body: {}", e)))?;
        Some(request.message_ids)
    };

    require_user(&state, &sender_id).await?;

    let changed = state
        .delivery
        .mark_read(&claims.sub, &sender_id, message_ids)
        .await
        .map_err(|e| (e.status_code(), e.to_string()))?;

    Ok(Json(MarkReadResponse {
        message_ids: changed,
    }))
}
