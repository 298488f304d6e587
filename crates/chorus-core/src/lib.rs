//! # chorus-core
//!
//! Foundation types for the Chorus broadcast relay.
//!
//! This crate provides the shared vocabulary that the server and binary depend on:
//!
//! - **Branded IDs**: `ConnectionId`, `MessageId` as newtypes for type safety
//! - **Messages**: immutable [`Message`] values with an [`Origin`]
//! - **Codec**: inbound frame decoding, outbound rendering, broker wire envelope
//! - **Lifecycle**: the `Connecting -> Open -> Closing -> Closed` state machine
//! - **Errors**: the relay error taxonomy with recoverable/fatal classification
//! - **Rendering**: the injected [`Renderer`] capability
//! - **Logging**: `tracing` subscriber initialization

#![deny(unsafe_code)]

pub mod codec;
pub mod errors;
pub mod ids;
pub mod lifecycle;
pub mod logging;
pub mod message;
pub mod render;

pub use codec::{Frame, Inbound};
pub use errors::{
    BrokerError, CodecError, HandshakeError, RelayError, RenderError, Severity, TransportError,
};
pub use ids::{ConnectionId, MessageId};
pub use lifecycle::{CloseReason, ConnState, Lifecycle};
pub use message::{Message, Origin};
pub use render::Renderer;
