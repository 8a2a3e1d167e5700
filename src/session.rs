#![forbid(unsafe_code)]

// Session table - per-connection role and room membership

use crate::error::RelayError;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Stable identifier assigned to a WebSocket connection when it opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Role a connection plays inside its room. Fixed once bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Broadcaster,
    Viewer { viewer_id: String },
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::Broadcaster => "broadcaster",
            Role::Viewer { .. } => "viewer",
        }
    }
}

/// Room membership of one live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub room_code: String,
    pub role: Role,
}

impl Session {
    pub fn broadcaster(room_code: impl Into<String>) -> Self {
        Self {
            room_code: room_code.into(),
            role: Role::Broadcaster,
        }
    }

    pub fn viewer(room_code: impl Into<String>, viewer_id: impl Into<String>) -> Self {
        Self {
            room_code: room_code.into(),
            role: Role::Viewer {
                viewer_id: viewer_id.into(),
            },
        }
    }

    pub fn viewer_id(&self) -> Option<&str> {
        match &self.role {
            Role::Viewer { viewer_id } => Some(viewer_id),
            Role::Broadcaster => None,
        }
    }
}

/// Maps live connections to their sessions.
///
/// Entries are created by `create-room`/`join-room` and removed when the
/// connection closes; a connection without an entry is unbound.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<ConnectionId, Session>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a session to a connection. A connection is bound at most once;
    /// a second call leaves the existing binding untouched.
    pub fn bind(&mut self, connection: ConnectionId, session: Session) -> Result<(), RelayError> {
        if self.sessions.contains_key(&connection) {
            return Err(RelayError::AlreadyBound);
        }
        self.sessions.insert(connection, session);
        Ok(())
    }

    pub fn lookup(&self, connection: ConnectionId) -> Option<&Session> {
        self.sessions.get(&connection)
    }

    pub fn is_bound(&self, connection: ConnectionId) -> bool {
        self.sessions.contains_key(&connection)
    }

    /// Removes and returns the session, if any. Idempotent.
    pub fn unbind(&mut self, connection: ConnectionId) -> Option<Session> {
        self.sessions.remove(&connection)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
    }
}
