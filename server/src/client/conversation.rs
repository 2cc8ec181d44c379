use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::history::{Message, MessageStatus};
use crate::ws::{ClientEvent, ServerEvent};

/// Early status updates kept while waiting for their message. Oldest go first.
const MAX_PENDING_STATUS: usize = 64;

/// Local view of one open conversation plus the online set.
#[derive(Debug, Default)]
pub struct ConversationView {
    me: String,
    selected: Option<String>,
    messages: Vec<Message>,
    seen: HashSet<String>,
    /// Status updates for messages not loaded yet.
    pending_status: HashMap<String, MessageStatus>,
    pending_order: VecDeque<String>,
    online: BTreeSet<String>,
    peer_typing: bool,
}

impl ConversationView {
    pub fn new(me: impl Into<String>) -> Self {
        Self {
            me: me.into(),
            ..Default::default()
        }
    }

    /// Open the conversation with `peer`. Clears the previous one.
    pub fn select(&mut self, peer: impl Into<String>) {
        self.selected = Some(peer.into());
        self.messages.clear();
        self.seen.clear();
        self.pending_status.clear();
        self.pending_order.clear();
        self.peer_typing = false;
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn status_of(&self, message_id: &str) -> Option<MessageStatus> {
        self.messages
            .iter()
            .find(|m| m.id == message_id)
            .map(|m| m.status)
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.online.contains(user_id)
    }

    pub fn online_users(&self) -> impl Iterator<Item = &str> {
        self.online.iter().map(String::as_str)
    }

    pub fn peer_typing(&self) -> bool {
        self.peer_typing
    }

    fn in_selected_conversation(&self, message: &Message) -> bool {
        match self.selected.as_deref() {
            Some(peer) => {
                (message.sender_id == peer && message.receiver_id == self.me)
                    || (message.sender_id == self.me && message.receiver_id == peer)
            }
            None => false,
        }
    }

    /// Insert unless already present; folds in any status seen earlier.
    fn insert(&mut self, mut message: Message) -> bool {
        if !self.seen.insert(message.id.clone()) {
            if let Some(pending) = self.take_pending(&message.id) {
                self.merge_status(&message.id, pending);
            }
            self.merge_status(&message.id, message.status);
            return false;
        }
        if let Some(pending) = self.take_pending(&message.id) {
            message.status = message.status.advance(pending);
        }
        self.messages.push(message);
        true
    }

    fn merge_status(&mut self, message_id: &str, status: MessageStatus) {
        match self.messages.iter_mut().find(|m| m.id == message_id) {
            Some(message) => message.status = message.status.advance(status),
            None => {
                if let Some(entry) = self.pending_status.get_mut(message_id) {
                    *entry = entry.advance(status);
                    return;
                }
                while self.pending_status.len() >= MAX_PENDING_STATUS {
                    match self.pending_order.pop_front() {
                        Some(oldest) => {
                            self.pending_status.remove(&oldest);
                        }
                        None => break,
                    }
                }
                self.pending_order.push_back(message_id.to_string());
                self.pending_status.insert(message_id.to_string(), status);
            }
        }
    }

    fn take_pending(&mut self, message_id: &str) -> Option<MessageStatus> {
        let status = self.pending_status.remove(message_id)?;
        self.pending_order.retain(|id| id != message_id);
        Some(status)
    }

    /// Replace the message list with freshly fetched history.
    ///
    /// Statuses already known locally win if they are further along. Returns
    /// a `mark-read` for incoming messages that were not read yet; those are
    /// marked read locally.
    pub fn load_history(&mut self, history: Vec<Message>) -> Option<ClientEvent> {
        let previous: HashMap<String, MessageStatus> = self
            .messages
            .drain(..)
            .map(|m| (m.id, m.status))
            .collect();
        self.seen.clear();

        for mut message in history {
            if !self.in_selected_conversation(&message) {
                continue;
            }
            if let Some(known) = previous.get(&message.id) {
                message.status = message.status.advance(*known);
            }
            self.insert(message);
        }

        let peer = self.selected.clone()?;
        let mut unread = Vec::new();
        for message in self.messages.iter_mut() {
            if message.sender_id == peer && message.status != MessageStatus::Read {
                message.status = MessageStatus::Read;
                unread.push(message.id.clone());
            }
        }

        if unread.is_empty() {
            None
        } else {
            Some(ClientEvent::MarkRead {
                sender_id: peer,
                message_ids: unread,
            })
        }
    }

    /// Fold one server event into the view. Returns an event the client
    /// should send back, if any.
    pub fn apply(&mut self, event: &ServerEvent) -> Option<ClientEvent> {
        match event {
            ServerEvent::PresenceSnapshot { user_ids } => {
                self.online = user_ids.iter().cloned().collect();
                None
            }
            ServerEvent::DeliverMessage(message) => {
                if message.receiver_id != self.me {
                    return None;
                }
                if self.in_selected_conversation(message) {
                    if !self.insert(message.clone()) {
                        return None;
                    }
                } else if self.seen.contains(&message.id) {
                    return None;
                }
                Some(ClientEvent::MarkDelivered {
                    message_id: message.id.clone(),
                    sender_id: message.sender_id.clone(),
                })
            }
            ServerEvent::StatusUpdate { message_id, status } => {
                self.merge_status(message_id, *status);
                None
            }
            ServerEvent::MessageAccepted { message, .. } => {
                if self.in_selected_conversation(message) {
                    self.insert(message.clone());
                }
                None
            }
            ServerEvent::TypingStart { sender_id } => {
                if self.selected.as_deref() == Some(sender_id.as_str()) {
                    self.peer_typing = true;
                }
                None
            }
            ServerEvent::TypingStop { sender_id } => {
                if self.selected.as_deref() == Some(sender_id.as_str()) {
                    self.peer_typing = false;
                }
                None
            }
            ServerEvent::Error { .. } => None,
        }
    }
}
