#![forbid(unsafe_code)]

// Signaling module - WebSocket relay server and its static side channel

pub mod connection;
pub mod lifecycle;
pub mod protocol;
pub mod router;

use crate::config::RelayConfig;
use crate::metrics::ServerMetrics;
use axum::{
    extract::{ws::WebSocketUpgrade, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeFile;
use tracing::{info, warn};

pub use lifecycle::Relay;

/// The three assets the side channel serves: request path and file name.
pub const STATIC_ASSETS: [(&str, &str); 3] = [
    ("/", "index.html"),
    ("/client.js", "client.js"),
    ("/style.css", "style.css"),
];

/// Signaling server state
#[derive(Clone)]
pub struct SignalingServer {
    relay: Arc<Relay>,
    config: Arc<RelayConfig>,
    metrics: ServerMetrics,
    connection_semaphore: Arc<Semaphore>,
}

impl SignalingServer {
    pub fn new(relay: Arc<Relay>, config: RelayConfig, metrics: ServerMetrics) -> Self {
        info!("Max connections: {}", config.max_connections);
        if config.metrics_token.is_some() {
            info!("Operational endpoints enabled at /health and /metrics");
        }

        Self {
            relay,
            connection_semaphore: Arc::new(Semaphore::new(config.max_connections)),
            config: Arc::new(config),
            metrics,
        }
    }

    /// Resolves once every admitted connection has finished, i.e. all
    /// admission permits are back in the semaphore.
    pub fn drained(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let semaphore = self.connection_semaphore.clone();
        let permits = u32::try_from(self.config.max_connections).unwrap_or(u32::MAX);
        async move {
            let _ = semaphore.acquire_many_owned(permits).await;
        }
    }

    /// Builds the router: `/ws`, the static allow-list, optional operational
    /// endpoints, and 404 for everything else.
    pub fn router(self) -> Router {
        let mut router = Router::new().route("/ws", get(ws_handler));

        for (path, file) in STATIC_ASSETS {
            router = router.route_service(path, ServeFile::new(self.config.static_dir.join(file)));
        }

        if self.config.metrics_token.is_some() {
            router = router
                .route("/health", get(health_handler))
                .route("/metrics", get(metrics_handler));
        }

        router
            .fallback(not_found)
            .with_state(self)
            .layer(CorsLayer::permissive())
    }

    /// Starts the signaling server on the specified port
    ///
    /// # Errors
    /// Returns an error if the server fails to bind to the port
    pub async fn serve(self, port: u16) -> anyhow::Result<()> {
        let addr = format!("0.0.0.0:{port}");
        let listener = TcpListener::bind(&addr).await?;
        self.serve_on(listener).await
    }

    /// Serves on an already bound listener.
    ///
    /// # Errors
    /// Returns an error if the underlying server fails
    pub async fn serve_on(self, listener: TcpListener) -> anyhow::Result<()> {
        info!("Signaling server listening on {}", listener.local_addr()?);
        let app = self.router();
        axum::serve(listener, app).await?;
        Ok(())
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = self.config.metrics_token.as_deref() else {
            return false;
        };
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected)
    }
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Health check handler
async fn health_handler(State(server): State<SignalingServer>, headers: HeaderMap) -> Response {
    if !server.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(serde_json::json!({
        "status": "ok",
        "rooms": server.relay.room_count(),
        "viewers": server.relay.viewer_count(),
        "sessions": server.relay.session_count(),
        "connections": server.relay.connection_count(),
    }))
    .into_response()
}

/// Metrics handler — Prometheus text exposition format.
async fn metrics_handler(State(server): State<SignalingServer>, headers: HeaderMap) -> Response {
    if !server.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let body = server
        .metrics
        .render_prometheus(server.relay.room_count(), server.relay.session_count());
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(server): State<SignalingServer>) -> Response {
    let permit = match server.connection_semaphore.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            warn!("Connection limit reached, rejecting WebSocket upgrade");
            return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
        }
    };

    let channel_capacity = server.config.channel_capacity;
    ws.max_message_size(server.config.max_message_size)
        .on_failed_upgrade(|error| {
            warn!("WebSocket upgrade failed: {}", error);
        })
        .on_upgrade(move |socket| {
            connection::handle_connection(socket, server.relay, server.metrics, channel_capacity, permit)
        })
}
