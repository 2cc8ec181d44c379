use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::ffi::OsString;
use std::time::Duration;

use crate::chat::delivery::{DEFAULT_MAX_ATTACHMENT_BYTES, DEFAULT_MAX_TEXT_LEN};
use crate::chat::MessageLimits;
use crate::ws::ConnectionPolicy;

/// Hard cap on a history page regardless of configuration.
pub const MAX_HISTORY_PAGE: u32 = 100;

/// Chatline messaging server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "chatline-server", version, about = "Chatline real-time messaging server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "CHATLINE_PORT", default_value = "5001")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "CHATLINE_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./chatline.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "CHATLINE_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, signing key)
    #[arg(long, env = "CHATLINE_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Live connections per user: "single" (newest wins) or "multi" (fan out)
    #[arg(long, env = "CHATLINE_CONNECTION_POLICY", value_enum, default_value = "single")]
    pub connection_policy: ConnectionPolicy,

    /// Maximum message text length in characters
    #[arg(long, env = "CHATLINE_MAX_TEXT_LEN", default_value_t = DEFAULT_MAX_TEXT_LEN)]
    pub max_text_len: usize,

    /// Maximum attachment payload in bytes
    #[arg(long, env = "CHATLINE_MAX_ATTACHMENT_BYTES", default_value_t = DEFAULT_MAX_ATTACHMENT_BYTES)]
    pub max_attachment_bytes: usize,

    /// Seconds between server WebSocket pings
    #[arg(long, env = "CHATLINE_PING_INTERVAL_SECS", default_value = "30")]
    pub ping_interval_secs: u64,

    /// Seconds to wait for a pong before closing the connection
    #[arg(long, env = "CHATLINE_PONG_TIMEOUT_SECS", default_value = "10")]
    pub pong_timeout_secs: u64,

    /// Default page size for message history (capped at 100)
    #[arg(long, env = "CHATLINE_HISTORY_PAGE_LIMIT", default_value = "50")]
    pub history_page_limit: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5001,
            bind_address: "0.0.0.0".to_string(),
            config: "./chatline.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            connection_policy: ConnectionPolicy::Single,
            max_text_len: DEFAULT_MAX_TEXT_LEN,
            max_attachment_bytes: DEFAULT_MAX_ATTACHMENT_BYTES,
            ping_interval_secs: 30,
            pong_timeout_secs: 10,
            history_page_limit: 50,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (CHATLINE_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(std::env::args_os())
    }

    /// Same as [`Config::load`] with an explicit argument list.
    pub fn load_from<I, T>(args: I) -> Result<Self, figment::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = Config::command().get_matches_from(args);
        let cli = Config::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("CHATLINE_"))
            .merge(Serialized::defaults(command_line_values(&cli, &matches)))
            .extract()
    }

    pub fn message_limits(&self) -> MessageLimits {
        MessageLimits {
            max_text_len: self.max_text_len,
            max_attachment_bytes: self.max_attachment_bytes,
        }
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs.max(1))
    }

    pub fn history_page_limit(&self) -> u32 {
        self.history_page_limit.clamp(1, MAX_HISTORY_PAGE)
    }
}

/// Only the flags typed on the command line. Clap fills every other field
/// from its default or the environment, and those must not mask the TOML layer.
fn command_line_values(cli: &Config, matches: &ArgMatches) -> Map<String, Value> {
    let mut values = match serde_json::to_value(cli) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    values.retain(|id, _| matches.value_source(id) == Some(ValueSource::CommandLine));
    values
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Chatline Server Configuration
# Place this file at ./chatline.toml or specify with --config <path>
# All settings can be overridden via environment variables (CHATLINE_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 5001)
# port = 5001

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database and JWT signing key
# data_dir = "./data"

# ---- Live connections ----

# "single": a new connection for a user replaces the previous one
# "multi":  every device stays connected and receives every push
# connection_policy = "single"

# WebSocket keepalive
# ping_interval_secs = 30
# pong_timeout_secs = 10

# ---- Messages ----

# max_text_len = 4000
# max_attachment_bytes = 10485760   # 10 MiB

# Default history page size (hard cap 100)
# history_page_limit = 50
"#
    .to_string()
}
