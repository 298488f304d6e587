//! Error taxonomy for the relay.
//!
//! Each failure domain has its own [`thiserror`] enum:
//!
//! - [`HandshakeError`]: the upgrade was refused; no connection exists yet
//! - [`CodecError`]: an inbound frame or broker envelope is malformed
//! - [`RenderError`]: the render capability failed for one message
//! - [`TransportError`]: reading from or writing to the stream failed
//! - [`BrokerError`]: the pub/sub broker refused a publish or subscribe
//!
//! [`RelayError`] combines them and classifies each as [`Severity::Recoverable`]
//! (log, drop the unit of work, keep going) or [`Severity::ConnectionFatal`]
//! (move the connection to `Closing`). No error ever crosses into another
//! connection.

use thiserror::Error;

/// The upgrade handshake was refused before a connection existed.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The request was not a valid WebSocket upgrade.
    #[error("upgrade rejected: {0}")]
    Rejected(String),
    /// The server is at its configured connection limit.
    #[error("connection limit reached ({limit})")]
    CapacityExceeded {
        /// Configured maximum.
        limit: usize,
    },
    /// The server is shutting down and accepts no new connections.
    #[error("server is shutting down")]
    ShuttingDown,
}

/// An inbound payload could not be decoded.
///
/// Every variant is a flavour of malformed payload and is always recoverable.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The payload is not valid JSON or does not match the expected schema.
    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),
    /// The payload is valid JSON but not an object.
    #[error("malformed payload: expected a JSON object")]
    NotAnObject,
    /// A binary frame did not contain UTF-8 text.
    #[error("malformed payload: binary frame is not valid UTF-8")]
    NotUtf8,
    /// The frame kind carries no payload (ping, pong, close).
    #[error("malformed payload: {0} frames carry no message")]
    UnsupportedFrame(&'static str),
}

/// The render capability failed for a single message.
#[derive(Debug, Error)]
pub enum RenderError {
    /// No template is registered under this name.
    #[error("unknown template `{0}`")]
    UnknownTemplate(String),
    /// The template exists but rendering failed.
    #[error("template `{name}` failed to render: {message}")]
    Template {
        /// Template name.
        name: String,
        /// Underlying engine error.
        message: String,
    },
}

/// Reading from or writing to a connection's stream failed.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Reading the next frame failed.
    #[error("read failed: {0}")]
    Read(String),
    /// Writing a frame failed.
    #[error("write failed: {0}")]
    Write(String),
}

/// The pub/sub broker refused an operation.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Publishing a payload failed.
    #[error("publish to `{topic}` failed: {message}")]
    Publish {
        /// Target topic.
        topic: String,
        /// Broker-specific detail.
        message: String,
    },
    /// Registering a subscription failed.
    #[error("subscribe to `{topic}` failed: {message}")]
    Subscribe {
        /// Target topic.
        topic: String,
        /// Broker-specific detail.
        message: String,
    },
    /// Publishing did not complete within the configured bound.
    #[error("publish to `{topic}` timed out after {timeout_ms}ms")]
    Timeout {
        /// Target topic.
        topic: String,
        /// Configured bound in milliseconds.
        timeout_ms: u64,
    },
    /// The broker has been shut down.
    #[error("broker is shut down")]
    Shutdown,
}

/// How far the effect of an error reaches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    /// Drop the unit of work (frame, message) and continue.
    Recoverable,
    /// The connection (or connection attempt) must close.
    ConnectionFatal,
}

/// Any error the relay can observe on behalf of one connection.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Handshake refused.
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
    /// Inbound frame malformed.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// Rendering one outbound message failed.
    #[error(transparent)]
    Render(#[from] RenderError),
    /// Stream read or write failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Publishing a message to the broker failed.
    #[error("publish failed: {0}")]
    Publish(#[source] BrokerError),
    /// Subscribing a new connection failed.
    #[error("subscription setup failed: {0}")]
    Subscribe(#[source] BrokerError),
}

impl RelayError {
    /// Classify this error.
    pub fn severity(&self) -> Severity {
        match self {
            Self::Codec(_) | Self::Render(_) | Self::Publish(_) => Severity::Recoverable,
            Self::Handshake(_) | Self::Transport(_) | Self::Subscribe(_) => {
                Severity::ConnectionFatal
            }
        }
    }

    /// Whether the current unit of work can be dropped and processing continued.
    pub fn is_recoverable(&self) -> bool {
        self.severity() == Severity::Recoverable
    }

    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Handshake(_) => "handshake",
            Self::Codec(_) => "malformed_payload",
            Self::Render(_) => "render",
            Self::Transport(_) => "transport",
            Self::Publish(_) => "broker_publish",
            Self::Subscribe(_) => "broker_subscribe",
        }
    }
}
