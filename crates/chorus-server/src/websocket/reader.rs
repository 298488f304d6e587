//! Reader task: inbound frames to the fan-out router.

use std::sync::Arc;

use chorus_core::{CloseReason, Frame, Message, RelayError, codec};
use metrics::counter;
use tracing::{debug, instrument, warn};

use super::connection::Connection;
use super::transport::FrameSource;
use crate::metrics::{BROKER_ERRORS_TOTAL, RELAY_MALFORMED_TOTAL, RELAY_MESSAGES_RECEIVED_TOTAL};
use crate::router::FanoutRouter;

/// Why the reader stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReaderExit {
    /// End of stream or a close frame.
    PeerClosed,
    /// The transport failed; the connection was closed, never retried.
    TransportFailed,
    /// The connection was closed elsewhere or the server is shutting down.
    Cancelled,
}

/// Read until the peer goes away, the transport fails, or the connection's
/// token is cancelled.
#[instrument(skip_all, fields(conn_id = %connection.id()))]
pub async fn run_reader<S: FrameSource>(
    mut source: S,
    connection: Arc<Connection>,
    router: Arc<dyn FanoutRouter>,
) -> ReaderExit {
    loop {
        let next = tokio::select! {
            biased;
            () = connection.cancelled() => {
                // no-op unless the token was cancelled by shutdown
                let _ = connection.close(CloseReason::Shutdown);
                return ReaderExit::Cancelled;
            }
            next = source.next_frame() => next,
        };

        let frame = match next {
            None | Some(Ok(Frame::Close)) => {
                debug!("peer closed");
                let _ = connection.close(CloseReason::PeerClosed);
                return ReaderExit::PeerClosed;
            }
            Some(Err(error)) => {
                debug!(error = %error, "read failed");
                let _ = connection.close(CloseReason::ReadFailed);
                return ReaderExit::TransportFailed;
            }
            Some(Ok(frame)) => frame,
        };

        connection.mark_alive();
        if matches!(frame, Frame::Ping(_) | Frame::Pong(_)) {
            continue;
        }

        match relay_frame(&frame, &connection, router.as_ref()).await {
            Ok(()) => {}
            Err(error) if error.is_recoverable() => record_recoverable(&error),
            Err(error) => {
                warn!(error = %error, "fatal relay error");
                let _ = connection.close(CloseReason::ReadFailed);
                return ReaderExit::TransportFailed;
            }
        }
    }
}

async fn relay_frame(
    frame: &Frame,
    connection: &Arc<Connection>,
    router: &dyn FanoutRouter,
) -> Result<(), RelayError> {
    let inbound = codec::decode(frame)?;
    let message = Message::from_inbound(connection.id().clone(), inbound);
    counter!(RELAY_MESSAGES_RECEIVED_TOTAL).increment(1);
    router
        .publish(connection, message)
        .await
        .map_err(RelayError::Publish)
}

fn record_recoverable(error: &RelayError) {
    match error {
        RelayError::Codec(_) => {
            debug!(error = %error, "dropping malformed frame");
            counter!(RELAY_MALFORMED_TOTAL, "source" => "client").increment(1);
        }
        RelayError::Publish(_) => {
            warn!(error = %error, "publish failed, message dropped");
            counter!(BROKER_ERRORS_TOTAL, "op" => "publish").increment(1);
        }
        other => debug!(error = %other, kind = other.kind(), "recoverable error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::DirectRelay;
    use crate::websocket::testutil::{channel_source, test_connection, text};
    use bytes::Bytes;
    use chorus_core::{BrokerError, TransportError};
    use chorus_settings::{EchoPolicy, RelayStrategy};
    use tokio::sync::mpsc;

    async fn open_with_direct(
        relay: &Arc<DirectRelay>,
    ) -> (Arc<Connection>, mpsc::Receiver<Arc<Message>>) {
        let (conn, rx) = test_connection(16);
        conn.hold(relay.attach(&conn).await.unwrap());
        assert!(conn.mark_open());
        (conn, rx)
    }

    #[tokio::test]
    async fn relays_valid_frames_and_skips_malformed() {
        let relay = Arc::new(DirectRelay::new(EchoPolicy::All, 0));
        let (conn, mut rx) = open_with_direct(&relay).await;
        let (input, source) = channel_source();

        input.send(text("not json")).unwrap();
        input.send(text(r#"{"other":1}"#)).unwrap();
        input.send(text(r#"{"send":"hello","extra":true}"#)).unwrap();
        input
            .send(Ok(Frame::Binary(Bytes::from_static(br#"{"send":"bin"}"#))))
            .unwrap();
        drop(input);

        let exit = run_reader(source, conn.clone(), relay).await;

        assert_eq!(exit, ReaderExit::PeerClosed);
        assert_eq!(rx.recv().await.unwrap().content(), "hello");
        assert_eq!(rx.recv().await.unwrap().content(), "bin");
        assert_eq!(conn.close_reason(), Some(CloseReason::PeerClosed));
    }

    #[tokio::test]
    async fn read_error_closes_without_retry() {
        let relay = Arc::new(DirectRelay::new(EchoPolicy::All, 0));
        let (conn, mut rx) = open_with_direct(&relay).await;
        let (input, source) = channel_source();

        input
            .send(Err(TransportError::Read("connection reset".into())))
            .unwrap();
        // never read: the reader stops at the first transport error
        input.send(text(r#"{"send":"after"}"#)).unwrap();

        let exit = run_reader(source, conn.clone(), relay.clone()).await;

        assert_eq!(exit, ReaderExit::TransportFailed);
        assert_eq!(conn.close_reason(), Some(CloseReason::ReadFailed));
        assert!(rx.recv().await.is_none());
        assert_eq!(relay.connection_count(), 0);
    }

    #[tokio::test]
    async fn close_frame_ends_reader() {
        let relay = Arc::new(DirectRelay::new(EchoPolicy::All, 0));
        let (conn, _rx) = open_with_direct(&relay).await;
        let (input, source) = channel_source();
        input.send(Ok(Frame::Close)).unwrap();

        assert_eq!(
            run_reader(source, conn, relay).await,
            ReaderExit::PeerClosed
        );
    }

    #[tokio::test]
    async fn control_frames_mark_alive() {
        let relay = Arc::new(DirectRelay::new(EchoPolicy::All, 0));
        let (conn, mut rx) = open_with_direct(&relay).await;
        let _ = conn.check_alive();
        let (input, source) = channel_source();
        input.send(Ok(Frame::Pong(Bytes::new()))).unwrap();
        drop(input);

        let _ = run_reader(source, conn.clone(), relay).await;
        assert!(conn.check_alive());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn cancellation_stops_reader() {
        let relay = Arc::new(DirectRelay::new(EchoPolicy::All, 0));
        let (conn, _rx) = open_with_direct(&relay).await;
        let (_input, source) = channel_source();

        let handle = tokio::spawn(run_reader(source, conn.clone(), relay));
        assert!(conn.close(CloseReason::IdleTimeout));

        assert_eq!(handle.await.unwrap(), ReaderExit::Cancelled);
        assert_eq!(conn.close_reason(), Some(CloseReason::IdleTimeout));
    }

    struct FailingRouter;

    #[async_trait::async_trait]
    impl FanoutRouter for FailingRouter {
        async fn attach(
            &self,
            _connection: &Arc<Connection>,
        ) -> Result<Vec<crate::broker::Subscription>, BrokerError> {
            Ok(Vec::new())
        }

        async fn publish(
            &self,
            _origin: &Arc<Connection>,
            _message: Message,
        ) -> Result<(), BrokerError> {
            Err(BrokerError::Shutdown)
        }

        fn strategy(&self) -> RelayStrategy {
            RelayStrategy::Bus
        }
    }

    #[tokio::test]
    async fn publish_failure_is_recoverable() {
        let (conn, _rx) = test_connection(4);
        assert!(conn.mark_open());
        let (input, source) = channel_source();
        input.send(text(r#"{"send":"a"}"#)).unwrap();
        input.send(text(r#"{"send":"b"}"#)).unwrap();
        drop(input);

        let exit = run_reader(source, conn.clone(), Arc::new(FailingRouter)).await;

        // both publishes failed but only end-of-stream closed the connection
        assert_eq!(exit, ReaderExit::PeerClosed);
        assert_eq!(conn.close_reason(), Some(CloseReason::PeerClosed));
    }
}
