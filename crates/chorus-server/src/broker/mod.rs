//! Pub/sub broker adapter.
//!
//! The router and the connection lifecycle depend only on [`Broker`]; the
//! concrete broker (in-process here, a network broker elsewhere) stays behind
//! it.

pub mod in_process;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chorus_core::BrokerError;

pub use in_process::InProcessBroker;

/// Callback invoked once per payload delivered on a subscribed topic.
///
/// Must not block: it runs inside the broker's dispatch.
pub type DeliveryCallback = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Minimal publish/subscribe interface.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish `payload` to every current subscriber of `topic`.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BrokerError>;

    /// Register `callback` for every later publish on `topic`.
    async fn subscribe(
        &self,
        topic: &str,
        callback: DeliveryCallback,
    ) -> Result<Subscription, BrokerError>;

    /// Stop delivering and refuse further operations.
    fn shutdown(&self) {}
}

/// A registered interest plus its cancellation handle.
///
/// Cancelling (explicitly or by dropping) stops further deliveries. The
/// cancel action runs at most once.
pub struct Subscription {
    topic: String,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Wrap a cancel action for `topic`.
    pub fn new(topic: impl Into<String>, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            topic: topic.into(),
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Topic this subscription is registered on.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Stop deliveries.
    pub fn cancel(mut self) {
        self.run_cancel();
    }

    fn run_cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_cancel();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
