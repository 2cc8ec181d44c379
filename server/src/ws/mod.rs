pub mod actor;
pub mod events;
pub mod handler;
pub mod protocol;
pub mod registry;

use axum::body::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

pub use events::{ClientEvent, ServerEvent};
pub use registry::{ConnectionPolicy, ConnectionRegistry, Registration};

/// Frames queued for a connection's writer task.
#[derive(Debug, Clone)]
pub enum Outbound {
    Event(ServerEvent),
    Ping(Bytes),
    Pong(Bytes),
    Close { code: u16, reason: String },
}

/// Sender half of a connection's outbound queue.
pub type ConnectionSender = mpsc::UnboundedSender<Outbound>;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque reference to one live channel to one client process.
/// Cloning the handle clones the queue sender; equality is by connection id.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: u64,
    user_id: String,
    tx: ConnectionSender,
}

impl ConnectionHandle {
    pub fn new(user_id: impl Into<String>, tx: ConnectionSender) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            user_id: user_id.into(),
            tx,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Authenticated user this connection was admitted for.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Queue an event. Returns false if the writer is gone.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.tx.send(Outbound::Event(event)).is_ok()
    }

    pub fn send_frame(&self, frame: Outbound) -> bool {
        self.tx.send(frame).is_ok()
    }

    pub fn close(&self, code: u16, reason: &str) -> bool {
        self.send_frame(Outbound::Close {
            code,
            reason: reason.to_string(),
        })
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}
