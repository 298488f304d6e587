//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Make Prometheus the process-wide `metrics` recorder.
///
/// The handle renders the text exposition served on `/metrics`. Installing
/// twice fails.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("metrics exported in prometheus format");
    Ok(handle)
}

/// WebSocket connections opened (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket connections closed (counter, labels: reason).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Open WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Upgrade requests refused (counter, labels: reason).
pub const WS_HANDSHAKE_REJECTIONS_TOTAL: &str = "ws_handshake_rejections_total";
/// Connection lifetime in seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Messages dropped for a recipient whose queue was full or closing (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Recipients closed for dropping too many messages (counter).
pub const WS_SLOW_CONSUMER_DISCONNECTS_TOTAL: &str = "ws_slow_consumer_disconnects_total";
/// Inbound messages accepted for relay (counter).
pub const RELAY_MESSAGES_RECEIVED_TOTAL: &str = "relay_messages_received_total";
/// Outbound frames written (counter).
pub const RELAY_MESSAGES_SENT_TOTAL: &str = "relay_messages_sent_total";
/// Malformed payloads dropped (counter, labels: source).
pub const RELAY_MALFORMED_TOTAL: &str = "relay_malformed_total";
/// Messages skipped because rendering failed (counter).
pub const RELAY_RENDER_FAILURES_TOTAL: &str = "relay_render_failures_total";
/// Broker operation failures (counter, labels: op).
pub const BROKER_ERRORS_TOTAL: &str = "broker_errors_total";
/// Payloads skipped by lagging in-process subscribers (counter).
pub const BROKER_LAGGED_TOTAL: &str = "broker_lagged_total";
