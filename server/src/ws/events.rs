//! Live-channel event vocabulary.
//!
//! Every frame is a JSON text message shaped `{"event": "<name>", "data": {...}}`.

use serde::{Deserialize, Serialize};

use crate::history::{Message, MessageStatus};

/// Events a client sends to the server.
///
/// No variant carries the acting user's id as authority: the server binds it
/// from the authenticated connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Register this connection as the user's live channel. A `user_id`
    /// other than the authenticated one is rejected.
    AnnouncePresence {
        #[serde(default)]
        user_id: Option<String>,
    },
    SubmitMessage {
        #[serde(default)]
        request_id: Option<String>,
        receiver_id: String,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        attachment: Option<String>,
    },
    TypingStart {
        receiver_id: String,
    },
    TypingStop {
        receiver_id: String,
    },
    /// Acknowledge that a message from `sender_id` reached this client.
    MarkDelivered {
        message_id: String,
        sender_id: String,
    },
    MarkRead {
        sender_id: String,
        message_ids: Vec<String>,
    },
}

/// Events the server pushes to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Full online set; replaces the client's view.
    PresenceSnapshot {
        user_ids: Vec<String>,
    },
    DeliverMessage(Message),
    StatusUpdate {
        message_id: String,
        status: MessageStatus,
    },
    TypingStart {
        sender_id: String,
    },
    TypingStop {
        sender_id: String,
    },
    /// Reply to the submitting connection once the message is persisted.
    MessageAccepted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        message: Message,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        code: u16,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_event_wire_shape() {
        let event: ClientEvent = serde_json::from_value(json!({
            "event": "submit-message",
            "data": { "receiver_id": "bob", "text": "hi" }
        }))
        .unwrap();
        assert_eq!(
            event,
            ClientEvent::SubmitMessage {
                request_id: None,
                receiver_id: "bob".to_string(),
                text: Some("hi".to_string()),
                attachment: None,
            }
        );

        let event: ClientEvent = serde_json::from_value(json!({
            "event": "mark-read",
            "data": { "sender_id": "alice", "message_ids": ["m1", "m2"] }
        }))
        .unwrap();
        assert!(matches!(event, ClientEvent::MarkRead { message_ids, .. } if message_ids.len() == 2));
    }

    #[test]
    fn test_server_event_wire_shape() {
        let value = serde_json::to_value(ServerEvent::StatusUpdate {
            message_id: "m1".to_string(),
            status: MessageStatus::Delivered,
        })
        .unwrap();
        assert_eq!(
            value,
            json!({
                "event": "status-update",
                "data": { "message_id": "m1", "status": "delivered" }
            })
        );

        let value = serde_json::to_value(ServerEvent::TypingStart {
            sender_id: "alice".to_string(),
        })
        .unwrap();
        assert_eq!(value["event"], "typing-start");
        assert_eq!(value["data"]["sender_id"], "alice");
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let result = serde_json::from_value::<ClientEvent>(json!({
            "event": "join-group",
            "data": {}
        }));
        assert!(result.is_err());
    }
}
