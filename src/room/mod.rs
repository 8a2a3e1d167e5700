#![forbid(unsafe_code)]

// Room module - Room registry keyed by shareable 6-digit codes

use crate::session::ConnectionId;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Inclusive range room codes are drawn from.
pub const ROOM_CODE_MIN: u32 = 100_000;
pub const ROOM_CODE_MAX: u32 = 999_999;

/// Length of generated viewer identifiers.
pub const VIEWER_ID_LEN: usize = 9;
const VIEWER_ID_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// A rendezvous context: one broadcaster and any number of viewers.
#[derive(Debug)]
pub struct Room {
    pub code: String,
    /// Fixed for the room's lifetime; the room dies with this connection.
    pub broadcaster: ConnectionId,
    viewers: HashMap<String, ConnectionId>,
    /// Every viewer id ever handed out in this room, including departed viewers
    issued_viewer_ids: HashSet<String>,
}

impl Room {
    fn new(code: String, broadcaster: ConnectionId) -> Self {
        Self {
            code,
            broadcaster,
            viewers: HashMap::new(),
            issued_viewer_ids: HashSet::new(),
        }
    }

    /// Connection of a currently registered viewer
    pub fn viewer(&self, viewer_id: &str) -> Option<ConnectionId> {
        self.viewers.get(viewer_id).copied()
    }

    pub fn viewers(&self) -> impl Iterator<Item = (&str, ConnectionId)> + '_ {
        self.viewers.iter().map(|(id, conn)| (id.as_str(), *conn))
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    /// Registers a viewer connection under a freshly generated id.
    pub fn add_viewer<R: Rng>(&mut self, connection: ConnectionId, rng: &mut R) -> String {
        let viewer_id = loop {
            let candidate = generate_viewer_id(rng);
            if self.issued_viewer_ids.insert(candidate.clone()) {
                break candidate;
            }
            debug!("Viewer id collision in room {}, regenerating", self.code);
        };
        self.viewers.insert(viewer_id.clone(), connection);
        viewer_id
    }

    /// Removes a viewer entry. The id stays reserved.
    pub fn remove_viewer(&mut self, viewer_id: &str) -> Option<ConnectionId> {
        self.viewers.remove(viewer_id)
    }
}

/// Owns every active room.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<String, Room>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a room owned by `broadcaster` and returns its code.
    pub fn create_room(&mut self, broadcaster: ConnectionId) -> String {
        self.create_room_with(broadcaster, &mut rand::thread_rng())
    }

    /// Same as [`create_room`](Self::create_room) with a caller-supplied RNG.
    ///
    /// Codes are drawn uniformly from `ROOM_CODE_MIN..=ROOM_CODE_MAX` and
    /// redrawn until one is not in use.
    pub fn create_room_with<R: Rng>(&mut self, broadcaster: ConnectionId, rng: &mut R) -> String {
        let code = loop {
            let candidate = rng.gen_range(ROOM_CODE_MIN..=ROOM_CODE_MAX).to_string();
            if !self.rooms.contains_key(&candidate) {
                break candidate;
            }
            debug!("Room code {} already in use, regenerating", candidate);
        };
        self.rooms.insert(code.clone(), Room::new(code.clone(), broadcaster));
        info!("Created room {} for broadcaster {}", code, broadcaster);
        code
    }

    pub fn get(&self, code: &str) -> Option<&Room> {
        self.rooms.get(code)
    }

    pub fn get_mut(&mut self, code: &str) -> Option<&mut Room> {
        self.rooms.get_mut(code)
    }

    /// Removes a room, returning it so the caller can notify its viewers.
    pub fn destroy(&mut self, code: &str) -> Option<Room> {
        let room = self.rooms.remove(code);
        if room.is_some() {
            info!("Destroyed room {}", code);
        }
        room
    }

    /// Removes every room, for shutdown.
    pub fn drain(&mut self) -> Vec<Room> {
        self.rooms.drain().map(|(_, room)| room).collect()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn viewer_count(&self) -> usize {
        self.rooms.values().map(Room::viewer_count).sum()
    }
}

fn generate_viewer_id<R: Rng>(rng: &mut R) -> String {
    (0..VIEWER_ID_LEN)
        .map(|_| VIEWER_ID_CHARSET[rng.gen_range(0..VIEWER_ID_CHARSET.len())] as char)
        .collect()
}
