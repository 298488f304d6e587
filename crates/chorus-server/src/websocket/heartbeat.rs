//! Idle-connection detection.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant};

use super::connection::Connection;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// No inbound activity within the timeout window.
    TimedOut,
    /// The connection closed first.
    Cancelled,
}

/// Watch a connection's alive flag.
///
/// The alive flag is cleared on entry, then checked and reset at each
/// `interval` tick. Once `timeout / interval` consecutive ticks (at least 1)
/// pass without inbound activity, returns `HeartbeatResult::TimedOut`, so an
/// idle client is dropped `timeout` after the monitor starts. Pings are sent by the
/// writer; this task never touches the stream.
pub async fn run_heartbeat(
    connection: Arc<Connection>,
    interval: Duration,
    timeout: Duration,
) -> HeartbeatResult {
    let mut check_interval = time::interval_at(Instant::now() + interval, interval);
    let interval_ms = interval.as_millis().max(1);
    let max_missed = u64::try_from(timeout.as_millis() / interval_ms)
        .unwrap_or(u64::MAX)
        .max(1);
    let mut missed: u64 = 0;
    let _ = connection.check_alive();

    loop {
        tokio::select! {
            biased;
            () = connection.cancelled() => return HeartbeatResult::Cancelled,
            _ = check_interval.tick() => {
                if connection.check_alive() {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= max_missed {
                        return HeartbeatResult::TimedOut;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::testutil::test_connection;
    use chorus_core::CloseReason;

    #[tokio::test(start_paused = true)]
    async fn heartbeat_cancelled_by_close() {
        let (conn, _rx) = test_connection(4);
        let handle = tokio::spawn(run_heartbeat(
            conn.clone(),
            Duration::from_secs(100),
            Duration::from_secs(300),
        ));

        assert!(conn.close(CloseReason::PeerClosed));
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_connection_times_out() {
        let (conn, _rx) = test_connection(4);
        let started = Instant::now();

        let result = run_heartbeat(
            conn,
            Duration::from_millis(10),
            Duration::from_millis(30),
        )
        .await;

        assert_eq!(result, HeartbeatResult::TimedOut);
        // three silent intervals, nothing consumed by the flag set at accept
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(30) && elapsed < Duration::from_millis(40));
    }

    #[tokio::test(start_paused = true)]
    async fn active_connection_stays_alive() {
        let (conn, _rx) = test_connection(4);
        let activity = conn.clone();
        let ticker = tokio::spawn(async move {
            loop {
                time::sleep(Duration::from_millis(5)).await;
                activity.mark_alive();
            }
        });

        let outcome = time::timeout(
            Duration::from_millis(500),
            run_heartbeat(conn, Duration::from_millis(20), Duration::from_millis(20)),
        )
        .await;

        assert!(outcome.is_err(), "heartbeat should still be running");
        ticker.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn default_window_closes_at_timeout() {
        let (conn, _rx) = test_connection(4);
        let started = Instant::now();

        let result = run_heartbeat(conn, Duration::from_secs(30), Duration::from_secs(90)).await;

        assert_eq!(result, HeartbeatResult::TimedOut);
        assert_eq!(started.elapsed().as_secs(), 90);
    }

    #[tokio::test(start_paused = true)]
    async fn activity_in_first_interval_counts() {
        let (conn, _rx) = test_connection(4);
        let activity = conn.clone();
        let started = Instant::now();
        let _ = tokio::spawn(async move {
            time::sleep(Duration::from_millis(5)).await;
            activity.mark_alive();
        });

        let result = run_heartbeat(conn, Duration::from_millis(10), Duration::from_millis(10)).await;

        assert_eq!(result, HeartbeatResult::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_shorter_than_interval_allows_one_miss() {
        let (conn, _rx) = test_connection(4);

        let result = run_heartbeat(conn, Duration::from_secs(10), Duration::from_secs(1)).await;
        assert_eq!(result, HeartbeatResult::TimedOut);
    }
}
