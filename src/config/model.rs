//! Configuration data model.
//!
//! All structs derive `Serialize`/`Deserialize` for TOML persistence.
//! Every field has a default so an empty or missing file still starts a server.

use serde::{Deserialize, Serialize};

/// Root daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener and identity of this server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address to accept client connections on.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Server name used as the prefix of numeric replies.
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_motd")]
    pub motd: String,
    /// Upper bound on one fan-out write to a single recipient.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            name: default_name(),
            motd: default_motd(),
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

/// Diagnostic log output (not chat history).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter directive, overridden by `RUST_LOG` when set.
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default = "default_true")]
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            ansi: true,
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:6667".to_string()
}
fn default_name() -> String {
    "crabircd.local".to_string()
}
fn default_motd() -> String {
    "Welcome to crabircd".to_string()
}
fn default_send_timeout_ms() -> u64 {
    10_000
}
fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
