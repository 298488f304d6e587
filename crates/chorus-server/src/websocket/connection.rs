//! Per-connection state shared by the reader, writer, heartbeat and router.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chorus_core::{CloseReason, ConnState, ConnectionId, Lifecycle, Message};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;

use crate::broker::Subscription;

/// Outcome of a non-blocking enqueue onto a connection's outbound queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// The writer will transmit the message.
    Queued,
    /// The queue was full; the message was dropped for this recipient only.
    Dropped,
    /// The connection is closing and accepts nothing.
    Closed,
}

/// A connected WebSocket client.
pub struct Connection {
    id: ConnectionId,
    lifecycle: Lifecycle,
    /// Sender half of the writer's queue. Taken on close.
    tx: Mutex<Option<mpsc::Sender<Arc<Message>>>>,
    cancel: CancellationToken,
    subscriptions: Mutex<Vec<Subscription>>,
    close_reason: Mutex<Option<CloseReason>>,
    connected_at: Instant,
    /// Set by any inbound frame, cleared by each heartbeat check.
    is_alive: AtomicBool,
    last_seen: Mutex<Instant>,
    dropped_messages: AtomicU64,
}

impl Connection {
    /// Create a connection in the `Connecting` state.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<Message>>, cancel: CancellationToken) -> Self {
        let now = Instant::now();
        Self {
            id,
            lifecycle: Lifecycle::new(),
            tx: Mutex::new(Some(tx)),
            cancel,
            subscriptions: Mutex::new(Vec::new()),
            close_reason: Mutex::new(None),
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_seen: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Connection ID.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnState {
        self.lifecycle.state()
    }

    /// Whether the connection is `Open`.
    pub fn is_open(&self) -> bool {
        self.lifecycle.is_open()
    }

    /// `Connecting -> Open`. Fails if a close already started.
    pub fn mark_open(&self) -> bool {
        self.lifecycle.open()
    }

    /// Enqueue `message` for the writer without waiting.
    pub fn deliver(&self, message: Arc<Message>) -> Delivery {
        let tx = self.tx.lock();
        let Some(tx) = tx.as_ref() else {
            return Delivery::Closed;
        };
        match tx.try_send(message) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Take ownership of the subscriptions that feed this connection.
    ///
    /// If a close already started they are cancelled immediately.
    pub fn hold(&self, subscriptions: Vec<Subscription>) {
        let mut held = self.subscriptions.lock();
        if matches!(self.state(), ConnState::Closing | ConnState::Closed) {
            drop(held);
            drop(subscriptions);
            return;
        }
        held.extend(subscriptions);
    }

    /// Start closing. Returns `true` only for the call that made the
    /// transition; every later call is a no-op.
    ///
    /// Order: cancel subscriptions, drop the writer's sender, cancel the
    /// token that both tasks select on.
    pub fn close(&self, reason: CloseReason) -> bool {
        if !self.lifecycle.begin_close() {
            return false;
        }
        *self.close_reason.lock() = Some(reason);

        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        for subscription in subscriptions {
            subscription.cancel();
        }
        drop(self.tx.lock().take());
        self.cancel.cancel();

        debug!(conn_id = %self.id, reason = reason.as_str(), "connection closing");
        true
    }

    /// `Closing -> Closed`, once both tasks exited and the stream is released.
    pub fn finish_close(&self) -> bool {
        self.lifecycle.finish_close()
    }

    /// Why the connection closed, once it has.
    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close_reason.lock()
    }

    /// Resolves once the connection's token is cancelled (close or shutdown).
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Whether the connection's token is cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Lifetime count of messages dropped because the queue was full.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record inbound activity.
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_seen.lock() = Instant::now();
    }

    /// Check and reset the alive flag.
    ///
    /// Returns `true` if there was activity since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the last inbound frame (or since accept).
    pub fn last_seen_elapsed(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

/// Closes the connection when dropped, so a panicking task still tears the
/// connection down.
pub struct CloseGuard {
    connection: Arc<Connection>,
    reason: CloseReason,
}

impl CloseGuard {
    /// Guard `connection`, closing it with `reason` on drop.
    pub fn new(connection: Arc<Connection>, reason: CloseReason) -> Self {
        Self { connection, reason }
    }
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        let _ = self.connection.close(self.reason);
    }
}
