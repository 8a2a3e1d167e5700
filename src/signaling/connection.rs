#![forbid(unsafe_code)]

// WebSocket connection handler for individual clients

use super::lifecycle::Relay;
use crate::error::ProtocolError;
use crate::metrics::ServerMetrics;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, info, warn};

/// Drives one WebSocket from upgrade to close.
///
/// Frames are read sequentially and each is handed to the relay as a single
/// event; outbound frames are drained by a separate writer task so a slow
/// client never stalls the relay.
pub async fn handle_connection(
    socket: WebSocket,
    relay: Arc<Relay>,
    metrics: ServerMetrics,
    channel_capacity: usize,
    _permit: OwnedSemaphorePermit,
) {
    metrics.inc_connections_total();
    let _conn_guard = metrics.connection_active_guard();

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Bounded queue; the relay holds the only sender and drops frames when it is full
    let (tx, mut rx) = mpsc::channel::<Arc<String>>(channel_capacity);
    let connection_id = relay.connect(tx);
    info!("New WebSocket connection: {}", connection_id);

    let send_metrics = metrics.clone();
    let send_task = tokio::spawn(async move {
        while let Some(json) = rx.recv().await {
            if ws_sender.send(Message::Text((*json).clone().into())).await.is_err() {
                break;
            }
            send_metrics.inc_frames_sent();
        }
        // Queue released: either this side is closing or the relay shut down
        let _ = ws_sender.send(Message::Close(None)).await;
        debug!("Send task finished for connection: {}", connection_id);
    });

    let mut shutdown = relay.shutdown_signal();
    loop {
        let frame = tokio::select! {
            frame = ws_receiver.next() => frame,
            _ = shutdown.wait_for(|closed| *closed) => {
                debug!("Relay shutting down, closing connection {}", connection_id);
                break;
            }
        };
        let Some(frame) = frame else {
            break;
        };
        let msg = match frame {
            Ok(msg) => msg,
            Err(e) => {
                debug!("WebSocket error for connection {}: {}", connection_id, e);
                break;
            }
        };

        match msg {
            Message::Text(text) => {
                metrics.inc_frames_received();
                let start = Instant::now();
                relay.handle_text(connection_id, text.as_str());
                metrics.observe_message_handling(start.elapsed());
            }
            Message::Close(_) => {
                info!("Client {} closed connection", connection_id);
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                // Answered by axum
            }
            Message::Binary(_) => {
                warn!("Discarding frame from {}: {}", connection_id, ProtocolError::UnsupportedFrame("binary"));
                metrics.inc_decode_errors();
            }
        }
    }

    // Removes the relay's sender, which ends the send task once the queue drains
    relay.disconnect(connection_id);
    let _ = send_task.await;

    info!("Connection handler finished for connection: {}", connection_id);
}
