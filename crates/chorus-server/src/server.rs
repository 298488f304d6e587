//! `ChorusServer`: Axum HTTP + WebSocket server.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::get;
use chorus_core::{ConnectionId, HandshakeError, Renderer};
use futures::StreamExt;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::metrics::WS_HANDSHAKE_REJECTIONS_TOTAL;
use crate::render::{self, TemplateRenderer};
use crate::router::{FanoutRouter, build_router};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::{SessionContext, run_session};

/// WebSocket endpoint path.
pub const WS_PATH: &str = "/ws";

/// Handler state; every field is cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Fan-out strategy.
    pub router: Arc<dyn FanoutRouter>,
    /// Outbound renderer.
    pub renderer: Arc<dyn Renderer>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Process start, for uptime.
    pub start_time: Instant,
    /// Upgraded connections currently held.
    pub active: Arc<AtomicUsize>,
    /// Prometheus handle for `/metrics`, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The relay server.
pub struct ChorusServer {
    config: Arc<ServerConfig>,
    router: Arc<dyn FanoutRouter>,
    renderer: Arc<dyn Renderer>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    active: Arc<AtomicUsize>,
    metrics: Option<PrometheusHandle>,
}

impl ChorusServer {
    /// Create a server with an explicit router and renderer.
    pub fn new(
        config: ServerConfig,
        router: Arc<dyn FanoutRouter>,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            router,
            renderer,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            active: Arc::new(AtomicUsize::new(0)),
            metrics: None,
        }
    }

    /// Create a server using the configured strategy and the HTML templates.
    pub fn from_config(config: ServerConfig) -> Self {
        let router = build_router(&config.relay);
        Self::new(config, router, Arc::new(TemplateRenderer))
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// `/`, `/ws`, `/health` and `/metrics` behind a trace layer.
    pub fn router(&self) -> Router {
        let state = AppState {
            router: self.router.clone(),
            renderer: self.renderer.clone(),
            config: self.config.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            active: self.active.clone(),
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/", get(index_handler))
            .route(WS_PATH, get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the server task.
    pub async fn listen(&self) -> io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let app = self.router();
        let token = self.shutdown.token();
        let fanout = Arc::clone(&self.router);

        info!(
            %addr,
            strategy = self.router.strategy().as_str(),
            echo = self.config.relay.echo.as_str(),
            "chorus server listening"
        );

        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(error) = serve.await {
                warn!(error = %error, "server stopped with error");
            }
            fanout.shutdown();
        });
        Ok((addr, handle))
    }

    /// Coordinator whose token stops the listener and every session.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Runtime configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The active fan-out strategy.
    pub fn fanout(&self) -> &Arc<dyn FanoutRouter> {
        &self.router
    }

    /// Upgraded connections currently held.
    pub fn connection_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// One reserved unit of `max_connections`, released on drop.
struct ConnectionSlot {
    active: Arc<AtomicUsize>,
}

impl ConnectionSlot {
    fn acquire(state: &AppState) -> Result<Self, HandshakeError> {
        if state.shutdown.is_shutting_down() {
            return Err(HandshakeError::ShuttingDown);
        }
        let limit = state.config.max_connections;
        let _ = state
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current < limit).then_some(current + 1)
            })
            .map_err(|_| HandshakeError::CapacityExceeded { limit })?;
        Ok(Self {
            active: state.active.clone(),
        })
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        let _ = self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

fn rejection_label(error: &HandshakeError) -> &'static str {
    match error {
        HandshakeError::Rejected(_) => "invalid_request",
        HandshakeError::CapacityExceeded { .. } => "capacity",
        HandshakeError::ShuttingDown => "shutting_down",
    }
}

/// GET /
async fn index_handler(State(state): State<AppState>) -> Response {
    match render::render_index(WS_PATH, state.router.strategy().as_str()) {
        Ok(page) => Html(page).into_response(),
        Err(error) => {
            warn!(error = %error, "failed to render index page");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to render page").into_response()
        }
    }
}

/// GET /ws
async fn ws_handler(
    State(state): State<AppState>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            let error = HandshakeError::Rejected(rejection.body_text());
            debug!(error = %error, "rejecting websocket request");
            counter!(WS_HANDSHAKE_REJECTIONS_TOTAL, "reason" => rejection_label(&error))
                .increment(1);
            return rejection.into_response();
        }
    };

    let slot = match ConnectionSlot::acquire(&state) {
        Ok(slot) => slot,
        Err(error) => {
            warn!(error = %error, "refusing websocket upgrade");
            counter!(WS_HANDSHAKE_REJECTIONS_TOTAL, "reason" => rejection_label(&error))
                .increment(1);
            return (StatusCode::SERVICE_UNAVAILABLE, error.to_string()).into_response();
        }
    };

    upgrade
        .max_message_size(state.config.max_message_size)
        .on_failed_upgrade(|error| {
            warn!(error = %error, "websocket upgrade failed");
            counter!(WS_HANDSHAKE_REJECTIONS_TOTAL, "reason" => "upgrade_failed").increment(1);
        })
        .on_upgrade(move |socket| handle_socket(socket, state, slot))
}

async fn handle_socket(socket: WebSocket, state: AppState, slot: ConnectionSlot) {
    let (sink, source) = socket.split();
    let ctx = SessionContext {
        router: state.router,
        renderer: state.renderer,
        config: state.config,
        shutdown: state.shutdown.connection_token(),
    };
    let summary = run_session(source, sink, ConnectionId::new(), ctx).await;
    debug!(
        conn_id = %summary.id,
        opened = summary.opened,
        dropped = summary.dropped,
        "session finished"
    );
    drop(slot);
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.active.load(Ordering::SeqCst),
        state.router.strategy().as_str(),
        state.shutdown.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use chorus_settings::RelayStrategy;
    use crate::broker::{Broker, InProcessBroker};
    use crate::router::BusRelay;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    fn make_server() -> ChorusServer {
        ChorusServer::from_config(ServerConfig::default())
    }

    async fn request(app: Router, uri: &str) -> (StatusCode, String) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 100_000)
            .await
            .unwrap();
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    #[test]
    fn server_with_default_config() {
        let server = make_server();
        assert_eq!(server.config().port, 8080);
        assert_eq!(server.fanout().strategy(), RelayStrategy::Direct);
        assert_eq!(server.connection_count(), 0);
        assert!(!server.shutdown().is_shutting_down());
    }

    #[tokio::test]
    async fn health_reports_strategy() {
        let (status, body) = request(make_server().router(), "/health").await;
        assert_eq!(status, StatusCode::OK);

        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["strategy"], "direct");
    }

    #[tokio::test]
    async fn health_reports_draining_after_shutdown() {
        let server = make_server();
        server.shutdown().shutdown();
        let (_, body) = request(server.router(), "/health").await;
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["status"], "draining");
    }

    #[tokio::test]
    async fn index_page_served() {
        let (status, body) = request(make_server().router(), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("ws-connect=\"/ws\""));
    }

    #[tokio::test]
    async fn ws_without_upgrade_is_rejected() {
        let (status, _) = request(make_server().router(), "/ws").await;
        assert!(status.is_client_error(), "got {status}");
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_not_found() {
        let (status, _) = request(make_server().router(), "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_with_handle_is_served() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let server = make_server().with_metrics(handle);
        let (status, _) = request(server.router(), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn unrouted_path_is_not_found() {
        let (status, _) = request(make_server().router(), "/nonexistent").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stopping_the_listener_shuts_down_the_broker() {
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..ServerConfig::default()
        };
        let broker = Arc::new(InProcessBroker::new());
        let fanout = Arc::new(BusRelay::new(broker.clone(), &config.relay));
        let server = ChorusServer::new(config, fanout, Arc::new(TemplateRenderer));
        let (_addr, handle) = server.listen().await.unwrap();

        let outcome = server
            .shutdown()
            .graceful_shutdown(vec![handle], Some(std::time::Duration::from_secs(5)))
            .await;

        assert!(outcome.is_clean());
        assert!(matches!(
            broker.publish("chat", bytes::Bytes::new()).await,
            Err(chorus_core::BrokerError::Shutdown)
        ));
    }

    #[test]
    fn connection_tokens_descend_from_the_coordinator() {
        let server = make_server();
        let token = server.shutdown().connection_token();
        server.shutdown().shutdown();
        assert!(token.is_cancelled());
    }

    #[test]
    fn slot_respects_limit_and_releases() {
        let server = ChorusServer::from_config(ServerConfig {
            max_connections: 1,
            ..ServerConfig::default()
        });
        let state = AppState {
            router: server.router.clone(),
            renderer: server.renderer.clone(),
            config: server.config.clone(),
            shutdown: server.shutdown.clone(),
            start_time: server.start_time,
            active: server.active.clone(),
            metrics: None,
        };

        let first = ConnectionSlot::acquire(&state).unwrap();
        assert!(matches!(
            ConnectionSlot::acquire(&state),
            Err(HandshakeError::CapacityExceeded { limit: 1 })
        ));
        assert_eq!(server.connection_count(), 1);
        drop(first);
        assert_eq!(server.connection_count(), 0);

        server.shutdown().shutdown();
        assert!(matches!(
            ConnectionSlot::acquire(&state),
            Err(HandshakeError::ShuttingDown)
        ));
    }
}
