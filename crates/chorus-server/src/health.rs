//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// JSON body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while accepting connections, `"draining"` during shutdown.
    pub status: String,
    /// Whole seconds since startup.
    pub uptime_secs: u64,
    /// Upgraded connections currently held.
    pub connections: usize,
    /// Active fan-out strategy.
    pub strategy: String,
}

/// Snapshot the server's health.
pub fn health_check(
    start_time: Instant,
    connections: usize,
    strategy: &str,
    draining: bool,
) -> HealthResponse {
    HealthResponse {
        status: if draining { "draining" } else { "ok" }.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        strategy: strategy.into(),
    }
}
