//! Writer task: the only code that writes to a connection's stream.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chorus_core::{CloseReason, Frame, Message, RelayError, Renderer, codec};
use metrics::counter;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, instrument, warn};

use super::connection::Connection;
use super::transport::FrameSink;
use crate::metrics::{RELAY_MESSAGES_SENT_TOTAL, RELAY_RENDER_FAILURES_TOTAL, WS_BROADCAST_DROPS_TOTAL};

/// Writer settings.
#[derive(Clone, Debug)]
pub struct WriterConfig {
    /// Template passed to the renderer for every message.
    pub template: String,
    /// Send a Ping this often (`None` disables pings).
    pub ping_interval: Option<Duration>,
}

/// Write queued messages (and pings) until the queue closes, the
/// connection's token is cancelled, or a write fails.
///
/// Returns the sink so the session can release the stream after both tasks
/// have stopped.
#[instrument(skip_all, fields(conn_id = %connection.id()))]
pub async fn run_writer<K: FrameSink>(
    mut sink: K,
    mut rx: mpsc::Receiver<Arc<Message>>,
    connection: Arc<Connection>,
    renderer: Arc<dyn Renderer>,
    config: WriterConfig,
) -> K {
    let mut pings = config.ping_interval.map(|period| {
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        let step = tokio::select! {
            biased;
            () = connection.cancelled() => {
                // no-op unless the token was cancelled by shutdown
                let _ = connection.close(CloseReason::Shutdown);
                break;
            }
            step = write_next(&mut sink, &mut rx, &mut pings, renderer.as_ref(), &config.template) => step,
        };

        match step {
            None => break,
            Some(Ok(())) => {}
            Some(Err(error)) if error.is_recoverable() => {
                warn!(error = %error, "skipping message that failed to render");
                counter!(RELAY_RENDER_FAILURES_TOTAL).increment(1);
            }
            Some(Err(error)) => {
                debug!(error = %error, "write failed");
                let _ = connection.close(CloseReason::WriteFailed);
                break;
            }
        }
    }

    rx.close();
    let mut discarded: u64 = 0;
    while rx.try_recv().is_ok() {
        discarded += 1;
    }
    if discarded > 0 {
        debug!(discarded, "discarded queued messages on exit");
        counter!(WS_BROADCAST_DROPS_TOTAL).increment(discarded);
    }
    sink
}

/// Wait for the next message or ping tick and write it. `None` once the
/// queue is closed.
async fn write_next<K: FrameSink>(
    sink: &mut K,
    rx: &mut mpsc::Receiver<Arc<Message>>,
    pings: &mut Option<Interval>,
    renderer: &dyn Renderer,
    template: &str,
) -> Option<Result<(), RelayError>> {
    tokio::select! {
        biased;
        next = rx.recv() => {
            let message = next?;
            let frame = match codec::encode(renderer, template, &message) {
                Ok(frame) => frame,
                Err(error) => return Some(Err(error.into())),
            };
            let sent = sink.send_frame(frame).await.map_err(RelayError::from);
            if sent.is_ok() {
                counter!(RELAY_MESSAGES_SENT_TOTAL).increment(1);
            }
            Some(sent)
        }
        () = next_ping(pings) => {
            Some(sink.send_frame(Frame::Ping(Bytes::new())).await.map_err(RelayError::from))
        }
    }
}

async fn next_ping(pings: &mut Option<Interval>) {
    match pings {
        Some(interval) => {
            let _ = interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
