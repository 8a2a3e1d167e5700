#![forbid(unsafe_code)]

// Message router - decides who receives each inbound signaling message

use super::protocol::{ClientMessage, ServerMessage};
use crate::error::{ProtocolError, RelayError};
use crate::room::RoomRegistry;
use crate::session::{ConnectionId, Role, Session, SessionTable};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Rooms and sessions, mutated only by the router and the lifecycle manager.
#[derive(Debug, Default)]
pub struct RelayState {
    pub rooms: RoomRegistry,
    pub sessions: SessionTable,
}

impl RelayState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// What to put on the wire for one recipient.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// A server-originated message, serialized at send time
    Message(ServerMessage),
    /// The sender's frame, forwarded byte-for-byte
    Forward(Arc<String>),
}

/// One outbound frame addressed to a connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub to: ConnectionId,
    pub payload: Payload,
}

impl Delivery {
    pub fn message(to: ConnectionId, message: ServerMessage) -> Self {
        Self {
            to,
            payload: Payload::Message(message),
        }
    }

    fn forward(to: ConnectionId, raw: &str) -> Self {
        Self {
            to,
            payload: Payload::Forward(Arc::new(raw.to_owned())),
        }
    }
}

/// Applies one client message to the relay state and returns the deliveries
/// it produces. `raw` is the frame text the message was decoded from.
///
/// Protocol errors become an `error` reply to the sender; stale or
/// misaddressed signaling is dropped and produces nothing.
pub fn route(state: &mut RelayState, from: ConnectionId, message: ClientMessage, raw: &str) -> Vec<Delivery> {
    let result = match message {
        ClientMessage::CreateRoom => create_room(state, from),
        ClientMessage::JoinRoom { room_id } => join_room(state, from, room_id.as_deref()),
        ClientMessage::Offer { to, .. } => Ok(offer(state, from, &to, raw)),
        ClientMessage::Answer { to, .. } => Ok(negotiate(state, from, "answer", to.as_deref(), raw)),
        ClientMessage::Candidate { to, .. } => Ok(negotiate(state, from, "candidate", to.as_deref(), raw)),
    };

    result.unwrap_or_else(|e| {
        debug!("Rejecting message from {}: {}", from, e);
        vec![Delivery::message(
            from,
            ServerMessage::Error { message: e.to_string() },
        )]
    })
}

fn ensure_unbound(sessions: &SessionTable, from: ConnectionId) -> Result<(), RelayError> {
    if sessions.is_bound(from) {
        return Err(RelayError::AlreadyBound);
    }
    Ok(())
}

fn create_room(state: &mut RelayState, from: ConnectionId) -> Result<Vec<Delivery>, RelayError> {
    ensure_unbound(&state.sessions, from)?;

    let room_code = state.rooms.create_room(from);
    state.sessions.bind(from, Session::broadcaster(room_code.clone()))?;

    Ok(vec![Delivery::message(from, ServerMessage::RoomCreated { room_code })])
}

fn join_room(state: &mut RelayState, from: ConnectionId, room_id: Option<&str>) -> Result<Vec<Delivery>, RelayError> {
    ensure_unbound(&state.sessions, from)?;

    // Codes are looked up as strings only; any other JSON value names no room
    let room_id = room_id.ok_or(RelayError::RoomNotFound)?;
    let room = state.rooms.get_mut(room_id).ok_or(RelayError::RoomNotFound)?;
    let viewer_id = room.add_viewer(from, &mut rand::thread_rng());
    let broadcaster = room.broadcaster;
    state.sessions.bind(from, Session::viewer(room_id, viewer_id.clone()))?;

    info!("Viewer {} ({}) joined room {}", viewer_id, from, room_id);

    Ok(vec![
        Delivery::message(
            from,
            ServerMessage::JoinedRoom {
                room_id: room_id.to_string(),
                viewer_id: viewer_id.clone(),
            },
        ),
        Delivery::message(broadcaster, ServerMessage::ViewerConnect { id: viewer_id }),
    ])
}

fn offer(state: &RelayState, from: ConnectionId, to: &str, raw: &str) -> Vec<Delivery> {
    let Some(session) = state.sessions.lookup(from) else {
        debug!("Dropping offer from unbound connection {}", from);
        return Vec::new();
    };
    if session.role != Role::Broadcaster {
        debug!("Dropping offer from viewer {} in room {}", from, session.room_code);
        return Vec::new();
    }
    forward_to_viewer(state, &session.room_code, "offer", to, raw)
}

/// Routes `answer` and `candidate`, which flow in both directions.
fn negotiate(state: &RelayState, from: ConnectionId, kind: &'static str, to: Option<&str>, raw: &str) -> Vec<Delivery> {
    let Some(session) = state.sessions.lookup(from) else {
        debug!("Dropping {} from unbound connection {}", kind, from);
        return Vec::new();
    };

    match &session.role {
        Role::Broadcaster => match to {
            Some(to) => forward_to_viewer(state, &session.room_code, kind, to, raw),
            None => {
                warn!("Dropping frame from {}: {}", from, ProtocolError::MissingRecipient { kind });
                Vec::new()
            }
        },
        Role::Viewer { viewer_id } => {
            // Sender must still be a registered viewer of a live room
            match state.rooms.get(&session.room_code) {
                Some(room) if room.viewer(viewer_id) == Some(from) => {
                    vec![Delivery::forward(room.broadcaster, raw)]
                }
                _ => {
                    debug!(
                        "Dropping {} from viewer {}: no longer in room {}",
                        kind, viewer_id, session.room_code
                    );
                    Vec::new()
                }
            }
        }
    }
}

fn forward_to_viewer(state: &RelayState, room_code: &str, kind: &str, to: &str, raw: &str) -> Vec<Delivery> {
    match state.rooms.get(room_code).and_then(|room| room.viewer(to)) {
        Some(connection) => vec![Delivery::forward(connection, raw)],
        None => {
            debug!("Dropping {} for viewer {} not in room {}", kind, to, room_code);
            Vec::new()
        }
    }
}
