//! Runtime configuration, built from [`ChorusSettings`].

use std::time::Duration;

use chorus_settings::{ChorusSettings, EchoPolicy, RelayStrategy};

/// Configuration for the relay server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Ping interval (`Duration::ZERO` disables heartbeats).
    pub heartbeat_interval: Duration,
    /// Close a connection after this long without inbound activity.
    pub heartbeat_timeout: Duration,
    /// How long shutdown waits for tracked tasks.
    pub shutdown_timeout: Duration,
    /// Fan-out configuration.
    pub relay: RelayConfig,
}

/// Fan-out configuration.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Direct or bus-mediated relay.
    pub strategy: RelayStrategy,
    /// Broker topic for the bus strategy.
    pub topic: String,
    /// Which connections receive a message relative to its origin.
    pub echo: EchoPolicy,
    /// Capacity of each connection's outbound queue.
    pub channel_capacity: usize,
    /// Close a recipient after this many drops (`0` never closes).
    pub max_drops_before_disconnect: u64,
    /// Upper bound on one broker publish.
    pub publish_timeout: Duration,
    /// Template for relayed messages.
    pub template: String,
}

impl ServerConfig {
    /// Build the runtime view of loaded settings.
    pub fn from_settings(settings: &ChorusSettings) -> Self {
        let server = &settings.server;
        let relay = &settings.relay;
        Self {
            host: server.host.clone(),
            port: server.port,
            max_connections: server.max_connections,
            max_message_size: server.max_message_size,
            heartbeat_interval: Duration::from_millis(server.heartbeat_interval_ms),
            heartbeat_timeout: Duration::from_millis(server.heartbeat_timeout_ms),
            shutdown_timeout: Duration::from_millis(server.shutdown_timeout_ms),
            relay: RelayConfig {
                strategy: relay.strategy,
                topic: relay.topic.clone(),
                echo: relay.echo,
                channel_capacity: relay.channel_capacity.max(1),
                max_drops_before_disconnect: relay.max_drops_before_disconnect,
                publish_timeout: Duration::from_millis(relay.publish_timeout_ms),
                template: relay.template.clone(),
            },
        }
    }

    /// `(interval, timeout)` when heartbeats are enabled.
    pub fn heartbeat(&self) -> Option<(Duration, Duration)> {
        (!self.heartbeat_interval.is_zero()).then_some((
            self.heartbeat_interval,
            self.heartbeat_timeout.max(self.heartbeat_interval),
        ))
    }

    /// `host:port` for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_settings(&ChorusSettings::default())
    }
}
