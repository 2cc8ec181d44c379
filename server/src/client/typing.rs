use std::time::{Duration, Instant};

use crate::ws::ClientEvent;

/// Inactivity window after which a typing indicator is withdrawn.
pub const TYPING_IDLE: Duration = Duration::from_secs(2);

/// Turns keystrokes into at most one `typing-start` per burst and a
/// `typing-stop` after [`TYPING_IDLE`] without input, or on send.
///
/// Time is passed in so callers can drive it from their own clock.
#[derive(Debug)]
pub struct TypingDebouncer {
    receiver_id: String,
    idle: Duration,
    last_input: Option<Instant>,
    active: bool,
}

impl TypingDebouncer {
    pub fn new(receiver_id: impl Into<String>) -> Self {
        Self::with_idle(receiver_id, TYPING_IDLE)
    }

    pub fn with_idle(receiver_id: impl Into<String>, idle: Duration) -> Self {
        Self {
            receiver_id: receiver_id.into(),
            idle,
            last_input: None,
            active: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// When `poll` will next emit a stop, if a burst is in progress.
    pub fn deadline(&self) -> Option<Instant> {
        match (self.active, self.last_input) {
            (true, Some(last)) => Some(last + self.idle),
            _ => None,
        }
    }

    pub fn on_input(&mut self, now: Instant) -> Option<ClientEvent> {
        self.last_input = Some(now);
        if self.active {
            return None;
        }
        self.active = true;
        Some(ClientEvent::TypingStart {
            receiver_id: self.receiver_id.clone(),
        })
    }

    pub fn poll(&mut self, now: Instant) -> Option<ClientEvent> {
        let last = self.last_input?;
        if self.active && now.saturating_duration_since(last) >= self.idle {
            return self.stop();
        }
        None
    }

    /// The message was sent; withdraw the indicator right away.
    pub fn on_send(&mut self) -> Option<ClientEvent> {
        self.stop()
    }

    fn stop(&mut self) -> Option<ClientEvent> {
        if !self.active {
            return None;
        }
        self.active = false;
        self.last_input = None;
        Some(ClientEvent::TypingStop {
            receiver_id: self.receiver_id.clone(),
        })
    }
}
