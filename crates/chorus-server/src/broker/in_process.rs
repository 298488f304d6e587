//! In-process broker backed by `tokio::sync::broadcast`.
//!
//! One broadcast channel per topic, created on first use. Each subscription
//! owns a receiver (created before `subscribe` returns, so it observes every
//! later publish) and a forwarding task that feeds the callback until the
//! subscription or the broker is cancelled.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use chorus_core::BrokerError;
use metrics::counter;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Broker, DeliveryCallback, Subscription};
use crate::metrics::BROKER_LAGGED_TOTAL;

/// Per-topic broadcast capacity.
const TOPIC_CAPACITY: usize = 1024;

/// Single-process pub/sub broker.
pub struct InProcessBroker {
    topics: RwLock<HashMap<String, broadcast::Sender<Bytes>>>,
    capacity: usize,
    shutdown: CancellationToken,
}

impl InProcessBroker {
    /// Create a broker with the default per-topic capacity.
    pub fn new() -> Self {
        Self::with_capacity(TOPIC_CAPACITY)
    }

    /// Create a broker whose topics buffer up to `capacity` payloads per
    /// subscriber before the slowest subscriber starts losing messages.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            shutdown: CancellationToken::new(),
        }
    }

    /// Number of topics created so far.
    pub fn topic_count(&self) -> usize {
        self.topics.read().len()
    }

    /// Live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .get(topic)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Bytes> {
        if let Some(sender) = self.topics.read().get(topic) {
            return sender.clone();
        }
        let mut topics = self.topics.write();
        topics
            .entry(topic.to_owned())
            .or_insert_with(|| {
                debug!(topic, "creating topic");
                broadcast::channel(self.capacity).0
            })
            .clone()
    }
}

impl Default for InProcessBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InProcessBroker {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl Broker for InProcessBroker {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BrokerError> {
        if self.shutdown.is_cancelled() {
            return Err(BrokerError::Shutdown);
        }
        match self.sender(topic).send(payload) {
            Ok(receivers) => debug!(topic, receivers, "published"),
            // No subscribers is not an error for a broadcast topic
            Err(_) => debug!(topic, "published with no subscribers"),
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        callback: DeliveryCallback,
    ) -> Result<Subscription, BrokerError> {
        if self.shutdown.is_cancelled() {
            return Err(BrokerError::Shutdown);
        }

        let mut receiver = self.sender(topic).subscribe();
        let token = self.shutdown.child_token();
        let task_token = token.clone();
        let topic_name = topic.to_owned();

        let _ = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = task_token.cancelled() => break,
                    received = receiver.recv() => match received {
                        Ok(payload) => callback(payload),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(topic = %topic_name, skipped, "subscriber lagged, payloads dropped");
                            counter!(BROKER_LAGGED_TOTAL).increment(skipped);
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            debug!(topic = %topic_name, "subscription forwarder stopped");
        });

        Ok(Subscription::new(topic, move || token.cancel()))
    }

    /// Stop every forwarding task and drop all topics.
    fn shutdown(&self) {
        self.shutdown.cancel();
        self.topics.write().clear();
        info!("in-process broker shut down");
    }
}
