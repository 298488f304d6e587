//! Bus-mediated relay: every connection subscribes to one broker topic.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chorus_core::{BrokerError, Message, codec};
use chorus_settings::{EchoPolicy, RelayStrategy};
use metrics::counter;
use tracing::{debug, warn};

use super::{FanoutRouter, deliver};
use crate::broker::{Broker, DeliveryCallback, Subscription};
use crate::config::RelayConfig;
use crate::metrics::RELAY_MALFORMED_TOTAL;
use crate::websocket::connection::Connection;

/// Relays through a [`Broker`] topic.
pub struct BusRelay {
    broker: Arc<dyn Broker>,
    topic: String,
    echo: EchoPolicy,
    max_drops: u64,
    publish_timeout: Duration,
}

impl BusRelay {
    /// Relay over `broker` using the topic, echo policy and limits in `config`.
    pub fn new(broker: Arc<dyn Broker>, config: &RelayConfig) -> Self {
        Self {
            broker,
            topic: config.topic.clone(),
            echo: config.echo,
            max_drops: config.max_drops_before_disconnect,
            publish_timeout: config.publish_timeout,
        }
    }

    fn callback_for(&self, connection: &Arc<Connection>) -> DeliveryCallback {
        let recipient = Arc::downgrade(connection);
        let topic = self.topic.clone();
        let echo = self.echo;
        let max_drops = self.max_drops;

        Arc::new(move |payload: Bytes| {
            let Some(recipient) = recipient.upgrade() else {
                return;
            };
            let message = match codec::from_wire(&payload) {
                Ok(message) => message,
                Err(error) => {
                    warn!(topic = %topic, error = %error, "dropping malformed broker payload");
                    counter!(RELAY_MALFORMED_TOTAL, "source" => "broker").increment(1);
                    return;
                }
            };
            if !echo.admits(message.is_from(recipient.id())) {
                return;
            }
            let _ = deliver(&recipient, &Arc::new(message.via_topic(&topic)), max_drops);
        })
    }
}

#[async_trait]
impl FanoutRouter for BusRelay {
    async fn attach(&self, connection: &Arc<Connection>) -> Result<Vec<Subscription>, BrokerError> {
        let subscription = self
            .broker
            .subscribe(&self.topic, self.callback_for(connection))
            .await?;
        debug!(conn_id = %connection.id(), topic = %self.topic, "subscribed");
        Ok(vec![subscription])
    }

    async fn publish(&self, origin: &Arc<Connection>, message: Message) -> Result<(), BrokerError> {
        let payload = codec::to_wire(&message).map_err(|error| BrokerError::Publish {
            topic: self.topic.clone(),
            message: error.to_string(),
        })?;

        match tokio::time::timeout(self.publish_timeout, self.broker.publish(&self.topic, payload)).await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::Timeout {
                topic: self.topic.clone(),
                timeout_ms: u64::try_from(self.publish_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }?;
        debug!(conn_id = %origin.id(), topic = %self.topic, "published to bus");
        Ok(())
    }

    fn strategy(&self) -> RelayStrategy {
        RelayStrategy::Bus
    }

    fn shutdown(&self) {
        self.broker.shutdown();
    }
}
