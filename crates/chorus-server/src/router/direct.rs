//! Direct relay over an in-memory map of connections.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chorus_core::{BrokerError, ConnectionId, Message};
use chorus_settings::{EchoPolicy, RelayStrategy};
use parking_lot::RwLock;
use tracing::debug;

use super::{FanoutRouter, deliver};
use crate::broker::Subscription;
use crate::websocket::connection::Connection;

type ConnectionMap = HashMap<ConnectionId, Arc<Connection>>;

/// Label for direct-relay subscriptions, which have no broker topic.
const DIRECT_TOPIC: &str = "direct";

/// Relays each message straight onto every eligible connection's queue.
pub struct DirectRelay {
    connections: Arc<RwLock<ConnectionMap>>,
    echo: EchoPolicy,
    max_drops: u64,
}

impl DirectRelay {
    /// Create an empty relay.
    pub fn new(echo: EchoPolicy, max_drops: u64) -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            echo,
            max_drops,
        }
    }

    /// Number of attached connections.
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }
}

#[async_trait]
impl FanoutRouter for DirectRelay {
    async fn attach(&self, connection: &Arc<Connection>) -> Result<Vec<Subscription>, BrokerError> {
        let id = connection.id().clone();
        let _ = self
            .connections
            .write()
            .insert(id.clone(), Arc::clone(connection));

        let registry: Weak<RwLock<ConnectionMap>> = Arc::downgrade(&self.connections);
        Ok(vec![Subscription::new(DIRECT_TOPIC, move || {
            if let Some(registry) = registry.upgrade() {
                let _ = registry.write().remove(&id);
            }
        })])
    }

    async fn publish(&self, origin: &Arc<Connection>, message: Message) -> Result<(), BrokerError> {
        // Snapshot under the read lock, enqueue outside it: closing a slow
        // consumer takes the write lock.
        let recipients: Vec<Arc<Connection>> = self
            .connections
            .read()
            .values()
            .filter(|conn| self.echo.admits(conn.id() == origin.id()))
            .cloned()
            .collect();

        let message = Arc::new(message);
        for recipient in &recipients {
            let _ = deliver(recipient, &message, self.max_drops);
        }
        debug!(conn_id = %origin.id(), recipients = recipients.len(), "relayed directly");
        Ok(())
    }

    fn strategy(&self) -> RelayStrategy {
        RelayStrategy::Direct
    }
}
