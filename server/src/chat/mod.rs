//! Live messaging core: presence, typing signals and message delivery.

pub mod delivery;
pub mod presence;
pub mod typing;

pub use delivery::{DeliveryError, DeliveryPipeline, MessageLimits};
pub use typing::TypingRelay;
