//! Presence Broadcaster.
//!
//! Derives the Online Set from the Connection Registry and pushes it, whole,
//! to every connected handle. Called by the registry while its lock is held,
//! so each broadcast reads a consistent snapshot.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::auth::middleware::Claims;
use crate::state::AppState;
use crate::ws::registry::PresenceEntries;
use crate::ws::{ConnectionHandle, ServerEvent};

/// Sorted ids of users with at least one live handle.
pub(crate) fn online_snapshot(entries: &PresenceEntries) -> Vec<String> {
    let mut user_ids: Vec<String> = entries
        .iter()
        .filter(|(_, handles)| !handles.is_empty())
        .map(|(user_id, _)| user_id.clone())
        .collect();
    user_ids.sort();
    user_ids
}

/// Send the full online set to every connected handle.
pub(crate) fn broadcast_snapshot(entries: &PresenceEntries) {
    let user_ids = online_snapshot(entries);
    let online = user_ids.len();
    let event = ServerEvent::PresenceSnapshot { user_ids };

    let mut recipients = 0usize;
    for handle in entries.values().flatten() {
        if handle.send(event.clone()) {
            recipients += 1;
        }
    }

    tracing::debug!(online, recipients, "Presence snapshot broadcast");
}

/// Send the full online set to one handle.
pub(crate) fn send_snapshot(entries: &PresenceEntries, handle: &ConnectionHandle) {
    handle.send(ServerEvent::PresenceSnapshot {
        user_ids: online_snapshot(entries),
    });
}

// --- REST endpoint handlers ---

#[derive(Debug, Serialize)]
pub struct PresenceResponse {
    pub online_user_ids: Vec<String>,
}

/// GET /api/presence
/// Current online set. JWT auth required.
pub async fn get_presence(State(state): State<AppState>, _claims: Claims) -> Json<PresenceResponse> {
    Json(PresenceResponse {
        online_user_ids: state.connections.online_users(),
    })
}
