#![forbid(unsafe_code)]

// Connection lifecycle - owns relay state and reacts to open/message/close events

use super::protocol::{self, ClientMessage, ServerMessage};
use super::router::{self, Delivery, Payload, RelayState};
use crate::metrics::ServerMetrics;
use crate::session::{ConnectionId, Role};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Outbound queue of pre-serialized frames for one connection.
pub type FrameSender = mpsc::Sender<Arc<String>>;

/// The relay service instance.
///
/// All room and session state sits behind a single mutex. Each event handler
/// takes the lock once, runs to completion, and only enqueues outbound frames
/// with `try_send`, so no handler ever observes another one half-applied.
/// The lock is never held across an await point.
pub struct Relay {
    inner: Mutex<Inner>,
    metrics: ServerMetrics,
    /// Flipped to `true` once by `shutdown`; socket tasks watch it to stop reading
    shutdown: watch::Sender<bool>,
}

struct Inner {
    state: RelayState,
    /// Outbound queues of every open connection, keyed by the id assigned at connect
    connections: HashMap<ConnectionId, FrameSender>,
}

impl Relay {
    pub fn new(metrics: ServerMetrics) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: RelayState::new(),
                connections: HashMap::new(),
            }),
            metrics,
            shutdown: watch::channel(false).0,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a new connection (unbound) and returns its id.
    pub fn connect(&self, sender: FrameSender) -> ConnectionId {
        let id = ConnectionId::new();
        self.lock().connections.insert(id, sender);
        debug!("Registered connection {}", id);
        id
    }

    /// Handles one inbound text frame. Malformed frames are logged and dropped.
    pub fn handle_text(&self, from: ConnectionId, text: &str) {
        match protocol::decode(text) {
            Ok(message) => self.handle_message(from, message, text),
            Err(e) => {
                warn!("Discarding frame from {}: {}", from, e);
                self.metrics.inc_decode_errors();
            }
        }
    }

    /// Routes an already decoded message. `raw` is forwarded verbatim where
    /// the message is relayed to a peer.
    pub fn handle_message(&self, from: ConnectionId, message: ClientMessage, raw: &str) {
        let mut inner = self.lock();
        let deliveries = router::route(&mut inner.state, from, message, raw);
        self.deliver(&inner.connections, deliveries);
    }

    /// Tears down a closed connection: drops its session and cleans up the
    /// room it belonged to, notifying whoever is left.
    pub fn disconnect(&self, id: ConnectionId) {
        let mut inner = self.lock();
        inner.connections.remove(&id);

        let Some(session) = inner.state.sessions.unbind(id) else {
            debug!("Unbound connection {} closed", id);
            return;
        };

        debug!("Unbinding {} {} from room {}", session.role.name(), id, session.room_code);
        let deliveries = match session.role {
            Role::Broadcaster => match inner.state.rooms.destroy(&session.room_code) {
                Some(room) => {
                    info!(
                        "Broadcaster {} left, closing room {} ({} viewers)",
                        id,
                        room.code,
                        room.viewer_count()
                    );
                    self.metrics.inc_rooms_closed();
                    room.viewers()
                        .map(|(_, viewer)| Delivery::message(viewer, ServerMessage::RoomClosed))
                        .collect()
                }
                None => Vec::new(),
            },
            Role::Viewer { viewer_id } => {
                let Some(room) = inner.state.rooms.get_mut(&session.room_code) else {
                    debug!("Viewer {} left room {} which is already closed", viewer_id, session.room_code);
                    return;
                };
                // The code may have been reused by a newer room; only remove our own entry
                if room.viewer(&viewer_id) != Some(id) {
                    debug!("Viewer {} is not registered to {} in room {}", viewer_id, id, room.code);
                    return;
                }
                room.remove_viewer(&viewer_id);
                info!("Viewer {} left room {}", viewer_id, room.code);
                self.metrics.inc_viewer_leaves();
                vec![Delivery::message(
                    room.broadcaster,
                    ServerMessage::ViewerDisconnect { id: viewer_id },
                )]
            }
        };

        self.deliver(&inner.connections, deliveries);
    }

    /// Closes every room, telling each broadcaster and viewer the room is gone,
    /// then releases every outbound queue so writer tasks flush and exit.
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        let rooms = inner.state.rooms.drain();
        inner.state.sessions.clear();

        let deliveries: Vec<Delivery> = rooms
            .iter()
            .flat_map(|room| {
                std::iter::once(room.broadcaster)
                    .chain(room.viewers().map(|(_, viewer)| viewer))
                    .map(|member| Delivery::message(member, ServerMessage::RoomClosed))
            })
            .collect();
        info!(
            "Shutting down relay: closing {} rooms, {} connections",
            rooms.len(),
            inner.connections.len()
        );
        for _ in &rooms {
            self.metrics.inc_rooms_closed();
        }
        self.deliver(&inner.connections, deliveries);

        inner.connections.clear();
        self.shutdown.send_replace(true);
    }

    /// Receiver that turns `true` when the relay shuts down.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn room_count(&self) -> usize {
        self.lock().state.rooms.len()
    }

    pub fn session_count(&self) -> usize {
        self.lock().state.sessions.len()
    }

    pub fn connection_count(&self) -> usize {
        self.lock().connections.len()
    }

    pub fn viewer_count(&self) -> usize {
        self.lock().state.rooms.viewer_count()
    }

    /// Best-effort send: skips connections that are gone or closed and drops
    /// frames for queues that are full. Never retries.
    fn deliver(&self, connections: &HashMap<ConnectionId, FrameSender>, deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            if let Payload::Message(message) = &delivery.payload {
                self.record(message);
            }

            let Some(sender) = connections.get(&delivery.to).filter(|s| !s.is_closed()) else {
                debug!("Connection {} is not open, dropping frame", delivery.to);
                self.metrics.inc_frames_dropped();
                continue;
            };

            let json = match delivery.payload {
                Payload::Forward(raw) => raw,
                Payload::Message(message) => match serde_json::to_string(&message) {
                    Ok(json) => Arc::new(json),
                    Err(e) => {
                        warn!("Failed to serialize message for {}: {}", delivery.to, e);
                        continue;
                    }
                },
            };

            match sender.try_send(json) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("Channel full for connection {}, dropping frame", delivery.to);
                    self.metrics.inc_frames_dropped();
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("Channel closed for connection {} (disconnected)", delivery.to);
                    self.metrics.inc_frames_dropped();
                }
            }
        }
    }

    fn record(&self, message: &ServerMessage) {
        match message {
            ServerMessage::RoomCreated { .. } => self.metrics.inc_rooms_created(),
            ServerMessage::JoinedRoom { .. } => self.metrics.inc_joins(),
            ServerMessage::Error { .. } => self.metrics.inc_protocol_errors(),
            ServerMessage::ViewerConnect { .. }
            | ServerMessage::ViewerDisconnect { .. }
            | ServerMessage::RoomClosed => {}
        }
    }
}
