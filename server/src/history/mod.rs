//! History Service boundary.
//!
//! The live core never talks to SQLite directly: it calls a [`HistoryStore`]
//! to persist messages and record read transitions. Implementations are
//! synchronous; async callers hop onto `spawn_blocking` (see [`run_blocking`]).

pub mod routes;
pub mod sqlite;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use sqlite::SqliteHistory;

/// Delivery lifecycle of a message. Ordering follows the lifecycle,
/// so `max` is the monotonic merge of two observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }

    /// Apply a transition. Never moves backwards.
    pub fn advance(self, next: MessageStatus) -> MessageStatus {
        self.max(next)
    }
}

/// A persisted one-to-one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status: MessageStatus,
}

/// A message as submitted, before the store assigns id, timestamp and status.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_id: String,
    pub receiver_id: String,
    pub text: Option<String>,
    pub attachment: Option<String>,
}

/// Public profile of a user, owned by the identity service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub full_name: String,
    pub email: String,
    #[serde(default)]
    pub profile_pic: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A conversation partner with the most recent activity in that conversation.
#[derive(Debug, Clone, Serialize)]
pub struct ChatPartner {
    #[serde(flatten)]
    pub user: UserProfile,
    pub last_message_at: DateTime<Utc>,
    /// Messages from this partner the caller has not read yet.
    pub unread_count: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("database lock poisoned")]
    Lock,
    #[error("unknown user: {0}")]
    UnknownUser(String),
    #[error("history task failed: {0}")]
    Task(String),
}

/// Durable store of users and message history.
pub trait HistoryStore: Send + Sync {
    fn upsert_user(&self, user: &UserProfile) -> Result<(), HistoryError>;

    fn user(&self, user_id: &str) -> Result<Option<UserProfile>, HistoryError>;

    /// Every known user except `excluding`, ordered by name.
    fn contacts(&self, excluding: &str) -> Result<Vec<UserProfile>, HistoryError>;

    /// Users `user_id` has exchanged messages with, most recent first.
    fn chat_partners(&self, user_id: &str) -> Result<Vec<ChatPartner>, HistoryError>;

    /// Messages between `user_a` and `user_b`, oldest first. With `before`,
    /// only messages older than that message id are returned.
    fn conversation(
        &self,
        user_a: &str,
        user_b: &str,
        before: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Message>, HistoryError>;

    /// Persist a message with status `sent`. Fails with `UnknownUser` when
    /// the receiver does not exist.
    fn insert_message(&self, message: NewMessage) -> Result<Message, HistoryError>;

    /// Move `message_id` from `sent` to `delivered` if `receiver_id` is its
    /// recipient. Returns whether anything changed.
    fn mark_delivered(&self, message_id: &str, receiver_id: &str) -> Result<bool, HistoryError>;

    /// Mark messages from `sender_id` to `receiver_id` as read. `None` means
    /// every unread message of the pair. Returns the ids that changed.
    fn mark_read(
        &self,
        receiver_id: &str,
        sender_id: &str,
        message_ids: Option<&[String]>,
    ) -> Result<Vec<String>, HistoryError>;
}

pub type SharedHistory = Arc<dyn HistoryStore>;

/// Run a store call on the blocking pool.
pub async fn run_blocking<T, F>(store: &SharedHistory, f: F) -> Result<T, HistoryError>
where
    T: Send + 'static,
    F: FnOnce(&dyn HistoryStore) -> Result<T, HistoryError> + Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| HistoryError::Task(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_never_regresses() {
        assert_eq!(MessageStatus::Read.advance(MessageStatus::Delivered), MessageStatus::Read);
        assert_eq!(MessageStatus::Delivered.advance(MessageStatus::Sent), MessageStatus::Delivered);
        assert_eq!(MessageStatus::Sent.advance(MessageStatus::Read), MessageStatus::Read);
    }

    #[test]
    fn test_status_replay_in_any_order() {
        let transitions = [
            MessageStatus::Delivered,
            MessageStatus::Read,
            MessageStatus::Delivered,
            MessageStatus::Delivered,
            MessageStatus::Read,
        ];
        let mut status = MessageStatus::Sent;
        let mut furthest = MessageStatus::Sent;
        for t in transitions {
            status = status.advance(t);
            furthest = furthest.max(t);
            assert_eq!(status, furthest);
        }
        assert_eq!(status, MessageStatus::Read);
    }

    #[test]
    fn test_status_wire_names() {
        for s in [MessageStatus::Sent, MessageStatus::Delivered, MessageStatus::Read] {
            assert_eq!(MessageStatus::parse(s.as_str()), Some(s));
            assert_eq!(
                serde_json::to_string(&s).unwrap(),
                format!("\"{}\"", s.as_str())
            );
        }
        assert_eq!(MessageStatus::parse("seen"), None);
    }
}
