//! Relayed message values.
//!
//! A [`Message`] is immutable once constructed: fields are private and only
//! exposed through accessors. Fan-out shares one value across every recipient
//! behind an `Arc`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::Inbound;
use crate::ids::{ConnectionId, MessageId};

/// Where a message came from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Origin {
    /// Produced by a connection and relayed directly.
    Connection {
        /// Originating connection.
        connection: ConnectionId,
    },
    /// Received from a broker topic.
    Topic {
        /// Topic the message was delivered on.
        topic: String,
        /// Connection that published it.
        connection: ConnectionId,
    },
}

impl Origin {
    /// The connection that produced the message, regardless of route.
    pub fn connection(&self) -> &ConnectionId {
        match self {
            Self::Connection { connection } | Self::Topic { connection, .. } => connection,
        }
    }

    /// The topic, for bus-mediated messages.
    pub fn topic(&self) -> Option<&str> {
        match self {
            Self::Connection { .. } => None,
            Self::Topic { topic, .. } => Some(topic),
        }
    }
}

/// A single relayed message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    id: MessageId,
    content: String,
    origin: Origin,
    sent_at: DateTime<Utc>,
}

impl Message {
    /// Create a message produced by `origin`.
    pub fn new(origin: ConnectionId, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            content: content.into(),
            origin: Origin::Connection { connection: origin },
            sent_at: Utc::now(),
        }
    }

    /// Build the message for a decoded inbound payload.
    pub fn from_inbound(origin: ConnectionId, inbound: Inbound) -> Self {
        Self::new(origin, inbound.send)
    }

    /// Re-label the message as delivered through `topic`.
    ///
    /// Identity, content and timestamp are preserved.
    #[must_use]
    pub fn via_topic(self, topic: &str) -> Self {
        let Self {
            id,
            content,
            origin,
            sent_at,
        } = self;
        let connection = match origin {
            Origin::Connection { connection } | Origin::Topic { connection, .. } => connection,
        };
        Self {
            id,
            content,
            origin: Origin::Topic {
                topic: topic.to_owned(),
                connection,
            },
            sent_at,
        }
    }

    /// Message ID.
    pub fn id(&self) -> &MessageId {
        &self.id
    }

    /// Text payload.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Where the message came from.
    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// When the relay accepted the message.
    pub fn sent_at(&self) -> DateTime<Utc> {
        self.sent_at
    }

    /// Whether `connection` produced this message.
    pub fn is_from(&self, connection: &ConnectionId) -> bool {
        self.origin.connection() == connection
    }
}
