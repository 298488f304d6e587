//! Fan-out strategy, echo policy, and per-connection queue settings.

use serde::{Deserialize, Serialize};

/// How a message reaches other connections.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayStrategy {
    /// In-process set of open connections.
    #[default]
    Direct,
    /// Publish to a broker topic every connection subscribes to.
    Bus,
}

impl RelayStrategy {
    /// Parse a strategy name (case-insensitive).
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "direct" => Some(Self::Direct),
            "bus" => Some(Self::Bus),
            _ => None,
        }
    }

    /// Lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Bus => "bus",
        }
    }
}

/// Which connections receive a message relative to its origin.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EchoPolicy {
    /// Every recipient, including the origin.
    #[default]
    #[serde(rename = "all")]
    All,
    /// Every recipient except the origin.
    #[serde(rename = "others")]
    Others,
    /// Only the origin.
    #[serde(rename = "self")]
    SelfOnly,
}

impl EchoPolicy {
    /// Parse a policy name (case-insensitive).
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "all" => Some(Self::All),
            "others" => Some(Self::Others),
            "self" => Some(Self::SelfOnly),
            _ => None,
        }
    }

    /// Whether a recipient gets the message, given whether it is the origin.
    pub fn admits(self, recipient_is_origin: bool) -> bool {
        match self {
            Self::All => true,
            Self::Others => !recipient_is_origin,
            Self::SelfOnly => recipient_is_origin,
        }
    }

    /// Lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Others => "others",
            Self::SelfOnly => "self",
        }
    }
}

/// Fan-out settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Fan-out strategy.
    pub strategy: RelayStrategy,
    /// Broker topic used by the bus strategy.
    pub topic: String,
    /// Echo policy.
    pub echo: EchoPolicy,
    /// Capacity of each connection's outbound queue.
    pub channel_capacity: usize,
    /// Close a recipient after this many dropped messages (`0` never closes).
    pub max_drops_before_disconnect: u64,
    /// Upper bound on a single broker publish.
    pub publish_timeout_ms: u64,
    /// Template used to render relayed messages.
    pub template: String,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            strategy: RelayStrategy::Direct,
            topic: "chat".to_string(),
            echo: EchoPolicy::All,
            channel_capacity: 256,
            max_drops_before_disconnect: 100,
            publish_timeout_ms: 1_000,
            template: "message.html".to_string(),
        }
    }
}
