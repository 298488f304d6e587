//! # chorus-server
//!
//! Axum HTTP + WebSocket relay.
//!
//! Each accepted WebSocket gets a reader task and a writer task joined by a
//! bounded queue. Readers hand decoded messages to a [`router::FanoutRouter`],
//! which either enqueues them directly on every eligible connection or goes
//! through a [`broker::Broker`] topic. Writers render via an injected
//! [`chorus_core::Renderer`] and are the only code writing to their socket.

#![deny(unsafe_code)]

pub mod broker;
pub mod config;
pub mod health;
pub mod metrics;
pub mod render;
pub mod router;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::{RelayConfig, ServerConfig};
pub use server::ChorusServer;
