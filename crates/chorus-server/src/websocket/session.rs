//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chorus_core::{CloseReason, ConnectionId, Message, RelayError, Renderer};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::connection::{CloseGuard, Connection};
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use super::reader::run_reader;
use super::transport::{FrameSink, FrameSource};
use super::writer::{WriterConfig, run_writer};
use crate::config::ServerConfig;
use crate::metrics::{
    BROKER_ERRORS_TOTAL, WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE,
    WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
};
use crate::router::FanoutRouter;

/// Everything a session needs besides its stream.
#[derive(Clone)]
pub struct SessionContext {
    /// Fan-out strategy shared by every connection.
    pub router: Arc<dyn FanoutRouter>,
    /// Outbound renderer.
    pub renderer: Arc<dyn Renderer>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Cancelled on server shutdown; the connection's own token is a child.
    pub shutdown: CancellationToken,
}

/// What happened to a finished session.
#[derive(Clone, Debug)]
pub struct SessionSummary {
    /// Connection ID.
    pub id: ConnectionId,
    /// Whether the connection reached `Open`.
    pub opened: bool,
    /// Recorded close reason.
    pub close_reason: Option<CloseReason>,
    /// Messages dropped because the queue was full.
    pub dropped: u64,
    /// Time from accept to release.
    pub duration: Duration,
}

/// Run a session to completion.
///
/// 1. Attaches the connection to the router (failure closes it before `Open`)
/// 2. Spawns the reader, the writer and, if enabled, the heartbeat monitor
/// 3. Waits for both I/O tasks, then releases the stream
#[instrument(skip_all, fields(conn_id = %id))]
pub async fn run_session<S, K>(
    source: S,
    mut sink: K,
    id: ConnectionId,
    ctx: SessionContext,
) -> SessionSummary
where
    S: FrameSource + 'static,
    K: FrameSink + 'static,
{
    let started = Instant::now();
    let relay = &ctx.config.relay;
    let (tx, rx) = mpsc::channel::<Arc<Message>>(relay.channel_capacity);
    let connection = Arc::new(Connection::new(id, tx, ctx.shutdown.child_token()));

    match ctx.router.attach(&connection).await {
        Ok(subscriptions) => connection.hold(subscriptions),
        Err(error) => {
            let error = RelayError::Subscribe(error);
            warn!(error = %error, "subscription setup failed");
            counter!(BROKER_ERRORS_TOTAL, "op" => "subscribe").increment(1);
            let _ = connection.close(CloseReason::SubscribeFailed);
            return release_unopened(&connection, &mut sink, started).await;
        }
    }
    if !connection.mark_open() {
        return release_unopened(&connection, &mut sink, started).await;
    }

    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
    info!(strategy = ctx.router.strategy().as_str(), "client connected");

    let writer_config = WriterConfig {
        template: relay.template.clone(),
        ping_interval: ctx.config.heartbeat().map(|(interval, _)| interval),
    };

    let reader = tokio::spawn({
        let connection = Arc::clone(&connection);
        let router = Arc::clone(&ctx.router);
        async move {
            let _guard = CloseGuard::new(Arc::clone(&connection), CloseReason::ReadFailed);
            run_reader(source, connection, router).await
        }
    });

    let writer = tokio::spawn({
        let connection = Arc::clone(&connection);
        let renderer = Arc::clone(&ctx.renderer);
        async move {
            let _guard = CloseGuard::new(Arc::clone(&connection), CloseReason::WriteFailed);
            run_writer(sink, rx, connection, renderer, writer_config).await
        }
    });

    let heartbeat = ctx.config.heartbeat().map(|(interval, timeout)| {
        let connection = Arc::clone(&connection);
        tokio::spawn(async move {
            if run_heartbeat(Arc::clone(&connection), interval, timeout).await
                == HeartbeatResult::TimedOut
                && connection.close(CloseReason::IdleTimeout)
            {
                warn!(
                    idle_ms = connection.last_seen_elapsed().as_millis() as u64,
                    "client unresponsive, disconnecting"
                );
            }
        })
    });

    let (reader_result, writer_result) = tokio::join!(reader, writer);
    if let Err(error) = reader_result {
        warn!(error = %error, "reader task failed");
    }
    match writer_result {
        Ok(mut sink) => {
            let _ = sink.close().await;
        }
        Err(error) => warn!(error = %error, "writer task failed"),
    }
    if let Some(heartbeat) = heartbeat {
        let _ = heartbeat.await;
    }
    let _ = connection.finish_close();

    let reason = connection.close_reason().unwrap_or(CloseReason::PeerClosed);
    let duration = started.elapsed();
    counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(duration.as_secs_f64());
    info!(
        reason = reason.as_str(),
        dropped = connection.drop_count(),
        age_ms = connection.age().as_millis() as u64,
        "client disconnected"
    );

    SessionSummary {
        id: connection.id().clone(),
        opened: true,
        close_reason: Some(reason),
        dropped: connection.drop_count(),
        duration,
    }
}

/// Release a connection that never reached `Open`; no tasks were spawned.
async fn release_unopened<K: FrameSink>(
    connection: &Connection,
    sink: &mut K,
    started: Instant,
) -> SessionSummary {
    let _ = sink.close().await;
    let _ = connection.finish_close();
    SessionSummary {
        id: connection.id().clone(),
        opened: false,
        close_reason: connection.close_reason(),
        dropped: 0,
        duration: started.elapsed(),
    }
}
