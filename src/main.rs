#![forbid(unsafe_code)]

use anyhow::Result;
use screencast_relay::config::RelayConfig;
use screencast_relay::metrics::ServerMetrics;
use screencast_relay::signaling::{Relay, SignalingServer};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long open sockets get to flush `room-closed` after Ctrl+C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "screencast_relay=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("screencast-relay - Starting server");

    let config = RelayConfig::from_env()?;
    info!("Serving static assets from {}", config.static_dir.display());

    let metrics = ServerMetrics::new();
    let relay = Arc::new(Relay::new(metrics.clone()));
    let port = config.port;
    let signaling_server = SignalingServer::new(relay.clone(), config, metrics);

    let drained = signaling_server.drained();

    info!("Starting signaling server on port {}", port);

    tokio::select! {
        result = signaling_server.serve(port) => {
            if let Err(e) = result {
                tracing::error!("Signaling server error: {}", e);
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            relay.shutdown();
            if tokio::time::timeout(SHUTDOWN_GRACE, drained).await.is_err() {
                warn!("Connections still open after {:?}, exiting anyway", SHUTDOWN_GRACE);
            }
        }
    }

    info!("Server shutdown complete");
    Ok(())
}
