//! Connection lifecycle state machine.
//!
//! `Connecting -> Open -> Closing -> Closed`, held in a single atomic so the
//! Reader, the Writer, the heartbeat monitor and the router can all observe
//! and advance it without locking. Every transition is a compare-and-swap:
//! concurrent close requests produce exactly one effective transition.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of one connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnState {
    /// Accepted and upgraded; subscriptions not yet established.
    Connecting = 0,
    /// Reader and Writer are running.
    Open = 1,
    /// A close was requested; tasks are winding down.
    Closing = 2,
    /// Both tasks exited and the stream was released.
    Closed = 3,
}

impl ConnState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }

    /// Lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a connection left `Open`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// The peer sent a close frame or ended the stream.
    PeerClosed,
    /// Reading from the stream failed.
    ReadFailed,
    /// Writing to the stream failed.
    WriteFailed,
    /// No inbound activity within the heartbeat timeout.
    IdleTimeout,
    /// Too many messages dropped because the outbound channel was full.
    SlowConsumer,
    /// The server is shutting down.
    Shutdown,
    /// Subscription setup failed before the connection opened.
    SubscribeFailed,
}

impl CloseReason {
    /// Stable label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PeerClosed => "peer_closed",
            Self::ReadFailed => "read_failed",
            Self::WriteFailed => "write_failed",
            Self::IdleTimeout => "idle_timeout",
            Self::SlowConsumer => "slow_consumer",
            Self::Shutdown => "shutdown",
            Self::SubscribeFailed => "subscribe_failed",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atomic lifecycle cell.
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
}

impl Lifecycle {
    /// Start in `Connecting`.
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnState::Connecting as u8),
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnState {
        ConnState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the connection is `Open`.
    pub fn is_open(&self) -> bool {
        self.state() == ConnState::Open
    }

    /// `Connecting -> Open`. Returns `false` if the connection was already
    /// closed (or opened) by someone else.
    pub fn open(&self) -> bool {
        self.transition(ConnState::Connecting, ConnState::Open)
    }

    /// `Connecting | Open -> Closing`.
    ///
    /// Returns `true` only for the caller that performed the transition.
    pub fn begin_close(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            match ConnState::from_u8(current) {
                ConnState::Closing | ConnState::Closed => return false,
                ConnState::Connecting | ConnState::Open => {}
            }
            match self.state.compare_exchange_weak(
                current,
                ConnState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// `Closing -> Closed`.
    pub fn finish_close(&self) -> bool {
        self.transition(ConnState::Closing, ConnState::Closed)
    }

    fn transition(&self, from: ConnState, to: ConnState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn starts_connecting() {
        let lc = Lifecycle::new();
        assert_eq!(lc.state(), ConnState::Connecting);
        assert!(!lc.is_open());
    }

    #[test]
    fn full_happy_path() {
        let lc = Lifecycle::new();
        assert!(lc.open());
        assert!(lc.is_open());
        assert!(lc.begin_close());
        assert_eq!(lc.state(), ConnState::Closing);
        assert!(lc.finish_close());
        assert_eq!(lc.state(), ConnState::Closed);
    }

    #[test]
    fn open_only_from_connecting() {
        let lc = Lifecycle::new();
        assert!(lc.open());
        assert!(!lc.open());
    }

    #[test]
    fn close_before_open_never_opens() {
        let lc = Lifecycle::new();
        assert!(lc.begin_close());
        assert!(!lc.open());
        assert_eq!(lc.state(), ConnState::Closing);
    }

    #[test]
    fn begin_close_is_idempotent() {
        let lc = Lifecycle::new();
        let _ = lc.open();
        assert!(lc.begin_close());
        assert!(!lc.begin_close());
        assert!(!lc.begin_close());
        assert_eq!(lc.state(), ConnState::Closing);
    }

    #[test]
    fn finish_close_requires_closing() {
        let lc = Lifecycle::new();
        let _ = lc.open();
        assert!(!lc.finish_close());
        let _ = lc.begin_close();
        assert!(lc.finish_close());
        assert!(!lc.finish_close());
        assert!(!lc.begin_close());
    }

    #[test]
    fn concurrent_close_has_single_winner() {
        let lc = Arc::new(Lifecycle::new());
        let _ = lc.open();
        let winners = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let lc = lc.clone();
                let winners = winners.clone();
                std::thread::spawn(move || {
                    if lc.begin_close() {
                        let _ = winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert_eq!(lc.state(), ConnState::Closing);
    }

    #[test]
    fn labels_are_snake_case() {
        let reasons = [
            CloseReason::PeerClosed,
            CloseReason::ReadFailed,
            CloseReason::WriteFailed,
            CloseReason::IdleTimeout,
            CloseReason::SlowConsumer,
            CloseReason::Shutdown,
            CloseReason::SubscribeFailed,
        ];
        for reason in reasons {
            assert!(
                reason
                    .as_str()
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c == '_')
            );
        }
        assert_eq!(ConnState::Open.to_string(), "open");
    }
}
