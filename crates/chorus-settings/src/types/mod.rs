//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]`. Each type implements
//! [`Default`] with production values, and `#[serde(default)]` allows partial
//! JSON: missing fields get their default during deserialization.

mod relay;
mod server;

pub use relay::*;
pub use server::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type for the relay.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "relay": { "strategy": "bus", "echo": "others" },
///   "logging": { "level": "debug" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChorusSettings {
    /// Network and connection settings.
    pub server: ServerSettings,
    /// Fan-out settings.
    pub relay: RelaySettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

impl ChorusSettings {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.relay.channel_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "relay.channelCapacity must be at least 1".into(),
            ));
        }
        if self.relay.topic.trim().is_empty() {
            return Err(SettingsError::InvalidValue(
                "relay.topic must not be empty".into(),
            ));
        }
        if self.relay.template.trim().is_empty() {
            return Err(SettingsError::InvalidValue(
                "relay.template must not be empty".into(),
            ));
        }
        if self.server.heartbeat_interval_ms > 0
            && self.server.heartbeat_timeout_ms < self.server.heartbeat_interval_ms
        {
            return Err(SettingsError::InvalidValue(format!(
                "server.heartbeatTimeoutMs ({}) must be >= heartbeatIntervalMs ({})",
                self.server.heartbeat_timeout_ms, self.server.heartbeat_interval_ms
            )));
        }
        if self.server.max_connections == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxConnections must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Logging output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level (`RUST_LOG` overrides).
    pub level: String,
    /// `compact` or `json`.
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}
