//! Client-side reconciliation for Rust clients of the live channel.
//!
//! The server relays status updates best effort and without cross-message
//! ordering. These types fold them into a consistent local view.

pub mod conversation;
pub mod typing;

pub use conversation::ConversationView;
pub use typing::{TypingDebouncer, TYPING_IDLE};
