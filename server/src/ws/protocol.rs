//! Dispatch of decoded client events for one connection.

use crate::state::AppState;
use crate::ws::{ClientEvent, ConnectionHandle, Registration, ServerEvent};

/// Close code sent to a connection replaced by a newer one for the same user.
pub const CLOSE_SUPERSEDED: u16 = 4004;

/// Per-connection protocol state, owned by the connection's reader loop.
pub struct Session {
    state: AppState,
    handle: ConnectionHandle,
    registration: Option<Registration>,
}

impl Session {
    pub fn new(state: AppState, handle: ConnectionHandle) -> Self {
        Self {
            state,
            handle,
            registration: None,
        }
    }

    pub fn user_id(&self) -> &str {
        self.handle.user_id()
    }

    pub fn is_announced(&self) -> bool {
        self.registration.is_some()
    }

    /// Register this connection as the user's live channel.
    ///
    /// Connections displaced under the single-connection policy are told to
    /// close. A repeated announce only refreshes the caller's snapshot.
    pub fn announce(&mut self) {
        if let Some(registration) = &self.registration {
            self.state.connections.send_snapshot(registration.handle());
            return;
        }

        let (registration, superseded) = Registration::new(&self.state.connections, self.handle.clone());
        for old in superseded {
            tracing::info!(
                user_id = %old.user_id(),
                connection_id = old.id(),
                "Closing superseded connection"
            );
            old.close(CLOSE_SUPERSEDED, "Superseded by a newer connection");
        }
        self.registration = Some(registration);

        tracing::debug!(
            user_id = %self.user_id(),
            connection_id = self.handle.id(),
            "Presence announced"
        );
    }

    fn send(&self, event: ServerEvent) {
        self.handle.send(event);
    }

    fn send_error(&self, request_id: Option<String>, code: u16, message: impl Into<String>) {
        self.send(ServerEvent::Error {
            request_id,
            code,
            message: message.into(),
        });
    }
}

/// Handle one incoming text frame.
/// Decodes the event, dispatches it, and answers errors on the same connection.
pub async fn handle_text_message(text: &str, session: &mut Session) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(
                user_id = %session.user_id(),
                error = %e,
                "Failed to decode client event"
            );
            session.send_error(None, 400, "Invalid event");
            return;
        }
    };

    dispatch_event(event, session).await;
}

async fn dispatch_event(event: ClientEvent, session: &mut Session) {
    let user_id = session.user_id().to_string();

    match event {
        ClientEvent::AnnouncePresence { user_id: claimed } => {
            if let Some(claimed) = claimed.filter(|c| *c != user_id) {
                tracing::warn!(
                    user_id = %user_id,
                    claimed = %claimed,
                    "Presence announced for another user"
                );
                session.send_error(None, 403, "Cannot announce presence for another user");
                return;
            }
            session.announce();
        }
        ClientEvent::SubmitMessage {
            request_id,
            receiver_id,
            text,
            attachment,
        } => {
            match session
                .state
                .delivery
                .submit(&user_id, &receiver_id, text, attachment)
                .await
            {
                Ok(message) => session.send(ServerEvent::MessageAccepted { request_id, message }),
                Err(e) => session.send_error(request_id, e.status_code().as_u16(), e.to_string()),
            }
        }
        ClientEvent::TypingStart { receiver_id } => {
            session.state.typing.start_typing(&user_id, &receiver_id);
        }
        ClientEvent::TypingStop { receiver_id } => {
            session.state.typing.stop_typing(&user_id, &receiver_id);
        }
        ClientEvent::MarkDelivered {
            message_id,
            sender_id,
        } => {
            session
                .state
                .delivery
                .mark_delivered(&user_id, &message_id, &sender_id);
        }
        ClientEvent::MarkRead {
            sender_id,
            message_ids,
        } => {
            if let Err(e) = session
                .state
                .delivery
                .mark_read(&user_id, &sender_id, Some(message_ids))
                .await
            {
                session.send_error(None, e.status_code().as_u16(), e.to_string());
            }
        }
    }
}
