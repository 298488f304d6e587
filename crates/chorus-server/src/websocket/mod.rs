//! WebSocket connection handling.
//!
//! - [`connection`]: per-connection state and lifecycle
//! - [`transport`]: frame source/sink seams over the socket halves
//! - [`reader`]: inbound frames to the router
//! - [`writer`]: outbound messages and pings to the socket
//! - [`heartbeat`]: idle detection
//! - [`session`]: supervisor tying the above together

pub mod connection;
pub mod heartbeat;
pub mod reader;
pub mod session;
pub mod transport;
pub mod writer;

#[cfg(test)]
pub(crate) mod testutil;

pub use connection::{Connection, Delivery};
pub use session::{SessionContext, SessionSummary, run_session};
pub use transport::{FrameSink, FrameSource};
