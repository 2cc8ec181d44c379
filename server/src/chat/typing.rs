//! Typing Signal Relay.
//!
//! Stateless: each call forwards at most one signal to the recipient's live
//! connection. Debouncing and the idle stop are the sending client's job
//! (see `client::typing`).

use crate::ws::{ConnectionRegistry, ServerEvent};

#[derive(Clone)]
pub struct TypingRelay {
    registry: ConnectionRegistry,
}

impl TypingRelay {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    /// Tell `to_user_id` that `from_user_id` started typing.
    /// Returns whether the signal was forwarded.
    pub fn start_typing(&self, from_user_id: &str, to_user_id: &str) -> bool {
        self.forward(
            from_user_id,
            to_user_id,
            ServerEvent::TypingStart {
                sender_id: from_user_id.to_string(),
            },
        )
    }

    pub fn stop_typing(&self, from_user_id: &str, to_user_id: &str) -> bool {
        self.forward(
            from_user_id,
            to_user_id,
            ServerEvent::TypingStop {
                sender_id: from_user_id.to_string(),
            },
        )
    }

    fn forward(&self, from_user_id: &str, to_user_id: &str, event: ServerEvent) -> bool {
        if from_user_id == to_user_id {
            return false;
        }
        let forwarded = self.registry.send_to_user(to_user_id, &event);
        if !forwarded {
            tracing::debug!(to = %to_user_id, "Typing signal dropped, recipient offline");
        }
        forwarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::test_support::{drain_non_presence, handle};
    use crate::ws::ConnectionPolicy;

    #[test]
    fn test_start_then_stop_reaches_recipient_in_order() {
        let registry = ConnectionRegistry::new(ConnectionPolicy::Single);
        let relay = TypingRelay::new(registry.clone());
        let (bob, mut bob_rx) = handle("bob");
        registry.register(bob);

        assert!(relay.start_typing("alice", "bob"));
        assert!(relay.stop_typing("alice", "bob"));

        assert_eq!(
            drain_non_presence(&mut bob_rx),
            vec![
                ServerEvent::TypingStart { sender_id: "alice".into() },
                ServerEvent::TypingStop { sender_id: "alice".into() },
            ]
        );
    }

    #[test]
    fn test_offline_recipient_is_noop() {
        let registry = ConnectionRegistry::new(ConnectionPolicy::Single);
        let relay = TypingRelay::new(registry.clone());
        let (alice, mut alice_rx) = handle("alice");
        registry.register(alice);

        assert!(!relay.start_typing("alice", "bob"));
        assert!(!relay.stop_typing("alice", "bob"));
        assert!(drain_non_presence(&mut alice_rx).is_empty());
    }

    #[test]
    fn test_signal_to_self_is_dropped() {
        let registry = ConnectionRegistry::new(ConnectionPolicy::Single);
        let relay = TypingRelay::new(registry.clone());
        let (alice, mut alice_rx) = handle("alice");
        registry.register(alice);

        assert!(!relay.start_typing("alice", "alice"));
        assert!(drain_non_presence(&mut alice_rx).is_empty());
    }
}
