//! Fan-out routing: from one reader to every eligible writer.
//!
//! Two strategies share [`FanoutRouter`]: [`DirectRelay`] keeps its own map
//! of connections, [`BusRelay`] goes through a [`Broker`](crate::broker::Broker)
//! topic. Neither blocks on a recipient; a full queue drops the message for
//! that recipient only.

pub mod bus;
pub mod direct;

use std::sync::Arc;

use async_trait::async_trait;
use chorus_core::{BrokerError, CloseReason, Message};
use chorus_settings::RelayStrategy;
use metrics::counter;
use tracing::warn;

pub use bus::BusRelay;
pub use direct::DirectRelay;

use crate::broker::{InProcessBroker, Subscription};
use crate::config::RelayConfig;
use crate::metrics::{WS_BROADCAST_DROPS_TOTAL, WS_SLOW_CONSUMER_DISCONNECTS_TOTAL};
use crate::websocket::connection::{Connection, Delivery};

/// Routes messages from an origin connection to its recipients.
#[async_trait]
pub trait FanoutRouter: Send + Sync {
    /// Start routing to `connection`. The returned subscriptions stop it
    /// when cancelled.
    async fn attach(&self, connection: &Arc<Connection>) -> Result<Vec<Subscription>, BrokerError>;

    /// Route `message` from `origin`. Never waits on a recipient.
    async fn publish(&self, origin: &Arc<Connection>, message: Message) -> Result<(), BrokerError>;

    /// Which strategy this router implements.
    fn strategy(&self) -> RelayStrategy;

    /// Release whatever the router holds beyond its connections.
    fn shutdown(&self) {}
}

/// Build the router selected by `config.strategy`.
pub fn build_router(config: &RelayConfig) -> Arc<dyn FanoutRouter> {
    match config.strategy {
        RelayStrategy::Direct => Arc::new(DirectRelay::new(
            config.echo,
            config.max_drops_before_disconnect,
        )),
        RelayStrategy::Bus => Arc::new(BusRelay::new(Arc::new(InProcessBroker::new()), config)),
    }
}

/// Enqueue `message` for `recipient`, closing it as a slow consumer once its
/// drops reach `max_drops` (`0` never closes).
pub(crate) fn deliver(recipient: &Connection, message: &Arc<Message>, max_drops: u64) -> Delivery {
    let outcome = recipient.deliver(Arc::clone(message));
    if outcome == Delivery::Dropped {
        counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
        let drops = recipient.drop_count();
        if max_drops > 0 && drops >= max_drops && recipient.close(CloseReason::SlowConsumer) {
            warn!(conn_id = %recipient.id(), drops, "closing slow consumer");
            counter!(WS_SLOW_CONSUMER_DISCONNECTS_TOTAL).increment(1);
        }
    }
    outcome
}
