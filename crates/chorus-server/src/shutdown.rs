//! Process-wide shutdown built on a root `CancellationToken`.
//!
//! Every connection runs under a child of the root token, so one
//! [`ShutdownCoordinator::shutdown`] closes all sessions and stops the
//! listener.

use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Used when no drain timeout is configured.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// How a drain ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrainOutcome {
    /// Tasks that exited before the deadline.
    pub finished: usize,
    /// Tasks still running at the deadline; these were aborted.
    pub aborted: usize,
}

impl DrainOutcome {
    /// Whether every task exited on its own.
    pub fn is_clean(&self) -> bool {
        self.aborted == 0
    }
}

/// Owner of the root token shared by the listener and every session.
#[derive(Default)]
pub struct ShutdownCoordinator {
    root: CancellationToken,
}

impl ShutdownCoordinator {
    /// Coordinator with an uncancelled root token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone of the root token.
    pub fn token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Token for one connection: cancelled by shutdown, cancellable alone.
    pub fn connection_token(&self) -> CancellationToken {
        self.root.child_token()
    }

    /// Cancel the root token. Idempotent.
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    /// True once [`shutdown`](Self::shutdown) has run.
    pub fn is_shutting_down(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Cancel everything, give `tasks` until `timeout` to exit, then abort
    /// whatever is left.
    pub async fn graceful_shutdown(
        &self,
        tasks: Vec<JoinHandle<()>>,
        timeout: Option<Duration>,
    ) -> DrainOutcome {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        self.shutdown();

        let total = tasks.len();
        info!(tasks = total, timeout_ms = timeout.as_millis() as u64, "draining");

        let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
        let mut pending: FuturesUnordered<_> = tasks.into_iter().collect();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let mut finished = 0;
        loop {
            tokio::select! {
                joined = pending.next() => match joined {
                    Some(_) => finished += 1,
                    None => break,
                },
                () = &mut deadline => break,
            }
        }

        let outcome = DrainOutcome {
            finished,
            aborted: total - finished,
        };
        if !outcome.is_clean() {
            warn!(aborted = outcome.aborted, ?timeout, "drain deadline passed, aborting tasks");
            for handle in &aborts {
                handle.abort();
            }
        }
        outcome
    }
}
