//! Message Delivery Pipeline.
//!
//! Persist first, then push. A message is `sent` once the History Service has
//! it; live delivery is best effort on top. Status transitions are relayed per
//! message id and only ever move forward (`sent -> delivered -> read`).

use axum::http::StatusCode;

use crate::history::{
    run_blocking, HistoryError, Message, MessageStatus, NewMessage, SharedHistory,
};
use crate::ws::{ConnectionRegistry, ServerEvent};

/// Maximum text length (chars).
pub const DEFAULT_MAX_TEXT_LEN: usize = 4000;
/// Maximum attachment payload (bytes of the encoded attachment string).
pub const DEFAULT_MAX_ATTACHMENT_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct MessageLimits {
    pub max_text_len: usize,
    pub max_attachment_bytes: usize,
}

impl Default for MessageLimits {
    fn default() -> Self {
        Self {
            max_text_len: DEFAULT_MAX_TEXT_LEN,
            max_attachment_bytes: DEFAULT_MAX_ATTACHMENT_BYTES,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("message needs text or an attachment")]
    EmptyMessage,
    #[error("text exceeds {0} characters")]
    TextTooLong(usize),
    #[error("attachment exceeds {0} bytes")]
    AttachmentTooLarge(usize),
    #[error("cannot send a message to yourself")]
    SelfAddressed,
    #[error("unknown recipient: {0}")]
    UnknownRecipient(String),
    #[error("history store failure: {0}")]
    Persistence(HistoryError),
}

impl From<HistoryError> for DeliveryError {
    fn from(err: HistoryError) -> Self {
        match err {
            HistoryError::UnknownUser(id) => Self::UnknownRecipient(id),
            other => Self::Persistence(other),
        }
    }
}

impl DeliveryError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::EmptyMessage | Self::SelfAddressed => StatusCode::BAD_REQUEST,
            Self::TextTooLong(_) | Self::AttachmentTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UnknownRecipient(_) => StatusCode::NOT_FOUND,
            Self::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Check a submission and normalize it. Blank text counts as absent.
pub fn validate_submission(
    limits: &MessageLimits,
    sender_id: &str,
    receiver_id: &str,
    text: Option<String>,
    attachment: Option<String>,
) -> Result<NewMessage, DeliveryError> {
    if sender_id == receiver_id {
        return Err(DeliveryError::SelfAddressed);
    }

    let text = text
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
    let attachment = attachment.filter(|a| !a.is_empty());

    if text.is_none() && attachment.is_none() {
        return Err(DeliveryError::EmptyMessage);
    }
    if let Some(text) = &text {
        if text.chars().count() > limits.max_text_len {
            return Err(DeliveryError::TextTooLong(limits.max_text_len));
        }
    }
    if let Some(attachment) = &attachment {
        if attachment.len() > limits.max_attachment_bytes {
            return Err(DeliveryError::AttachmentTooLarge(limits.max_attachment_bytes));
        }
    }

    Ok(NewMessage {
        sender_id: sender_id.to_string(),
        receiver_id: receiver_id.to_string(),
        text,
        attachment,
    })
}

#[derive(Clone)]
pub struct DeliveryPipeline {
    registry: ConnectionRegistry,
    history: SharedHistory,
    limits: MessageLimits,
}

impl DeliveryPipeline {
    pub fn new(registry: ConnectionRegistry, history: SharedHistory, limits: MessageLimits) -> Self {
        Self {
            registry,
            history,
            limits,
        }
    }

    /// Persist a new message and push it to the recipient if reachable.
    ///
    /// When the recipient is online the message is delivered now: the sender
    /// gets a `delivered` status update and the store records it. Returns the
    /// persisted message either way. Nothing is pushed if persistence fails.
    pub async fn submit(
        &self,
        sender_id: &str,
        receiver_id: &str,
        text: Option<String>,
        attachment: Option<String>,
    ) -> Result<Message, DeliveryError> {
        let draft = validate_submission(&self.limits, sender_id, receiver_id, text, attachment)?;

        let mut message = run_blocking(&self.history, move |store| store.insert_message(draft))
            .await
            .map_err(|err| {
                if !matches!(err, HistoryError::UnknownUser(_)) {
                    tracing::error!(sender = %sender_id, error = %err, "Failed to persist message");
                }
                DeliveryError::from(err)
            })?;

        let pushed = self
            .registry
            .send_to_user(&message.receiver_id, &ServerEvent::DeliverMessage(message.clone()));

        if !pushed {
            tracing::debug!(
                message_id = %message.id,
                receiver = %message.receiver_id,
                "Recipient offline, message stored as sent"
            );
            return Ok(message);
        }

        message.status = message.status.advance(MessageStatus::Delivered);
        self.registry.send_to_user(
            &message.sender_id,
            &ServerEvent::StatusUpdate {
                message_id: message.id.clone(),
                status: MessageStatus::Delivered,
            },
        );

        let message_id = message.id.clone();
        let receiver = message.receiver_id.clone();
        if let Err(err) =
            run_blocking(&self.history, move |store| store.mark_delivered(&message_id, &receiver)).await
        {
            // The live push already happened; history keeps `sent` until read
            tracing::warn!(message_id = %message.id, error = %err, "Failed to record delivery");
        }

        Ok(message)
    }

    /// Relay a recipient's delivery acknowledgment to the original sender.
    ///
    /// Transient: history is not touched. `acknowledged_by` is the
    /// authenticated recipient; an ack naming itself as sender is dropped.
    pub fn mark_delivered(&self, acknowledged_by: &str, message_id: &str, sender_id: &str) -> bool {
        if acknowledged_by == sender_id {
            return false;
        }
        self.registry.send_to_user(
            sender_id,
            &ServerEvent::StatusUpdate {
                message_id: message_id.to_string(),
                status: MessageStatus::Delivered,
            },
        )
    }

    /// Mark messages from `sender_id` to `receiver_id` as read and relay a
    /// `read` update to the sender for each message that changed.
    ///
    /// `None` covers every unread message of the pair. Only messages whose
    /// recipient is `receiver_id` are affected, and replays change nothing.
    pub async fn mark_read(
        &self,
        receiver_id: &str,
        sender_id: &str,
        message_ids: Option<Vec<String>>,
    ) -> Result<Vec<String>, DeliveryError> {
        if matches!(&message_ids, Some(ids) if ids.is_empty()) || receiver_id == sender_id {
            return Ok(Vec::new());
        }

        let receiver = receiver_id.to_string();
        let sender = sender_id.to_string();
        let changed = run_blocking(&self.history, move |store| {
            store.mark_read(&receiver, &sender, message_ids.as_deref())
        })
        .await
        .map_err(|err| {
            tracing::error!(receiver = %receiver_id, error = %err, "Failed to mark messages read");
            DeliveryError::Persistence(err)
        })?;

        for message_id in &changed {
            self.registry.send_to_user(
                sender_id,
                &ServerEvent::StatusUpdate {
                    message_id: message_id.clone(),
                    status: MessageStatus::Read,
                },
            );
        }

        if !changed.is_empty() {
            tracing::debug!(receiver = %receiver_id, sender = %sender_id, count = changed.len(), "Messages marked read");
        }
        Ok(changed)
    }
}
