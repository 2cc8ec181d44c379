use std::time::Duration;

use crate::chat::{DeliveryPipeline, TypingRelay};
use crate::config::Config;
use crate::history::SharedHistory;
use crate::ws::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Persistent message and user store
    pub history: SharedHistory,
    /// Live connections per user; source of the online set
    pub connections: ConnectionRegistry,
    pub delivery: DeliveryPipeline,
    pub typing: TypingRelay,
    /// JWT signing secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    /// Default page size for history queries
    pub history_page_limit: u32,
}

impl AppState {
    pub fn new(history: SharedHistory, jwt_secret: Vec<u8>, config: &Config) -> Self {
        let connections = ConnectionRegistry::new(config.connection_policy);
        let delivery = DeliveryPipeline::new(
            connections.clone(),
            history.clone(),
            config.message_limits(),
        );
        let typing = TypingRelay::new(connections.clone());

        Self {
            history,
            connections,
            delivery,
            typing,
            jwt_secret,
            ping_interval: config.ping_interval(),
            pong_timeout: config.pong_timeout(),
            history_page_limit: config.history_page_limit(),
        }
    }
}
