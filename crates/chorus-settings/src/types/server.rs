//! Server network and connection settings.

use serde::{Deserialize, Serialize};

/// Server network and runtime settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// HTTP/WebSocket port (`0` picks an ephemeral port).
    pub port: u16,
    /// Upgrade requests beyond this many open connections are refused.
    pub max_connections: usize,
    /// Largest accepted inbound WebSocket message in bytes.
    pub max_message_size: usize,
    /// Ping interval in milliseconds (`0` disables heartbeats).
    pub heartbeat_interval_ms: u64,
    /// Close a connection after this long without inbound activity.
    pub heartbeat_timeout_ms: u64,
    /// How long shutdown waits for tracked tasks.
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_connections: 1024,
            max_message_size: 64 * 1024,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            shutdown_timeout_ms: 30_000,
        }
    }
}
