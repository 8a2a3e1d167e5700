#![forbid(unsafe_code)]

// Error types for the relay: decode failures at the socket boundary and
// client-visible protocol errors.

use thiserror::Error;

/// Failure to turn an inbound frame into a `ClientMessage`.
///
/// These never reach the client; the frame is logged and discarded.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid message format: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("{kind} from broadcaster is missing the 'to' field")]
    MissingRecipient { kind: &'static str },

    #[error("Unsupported frame type: {0}")]
    UnsupportedFrame(&'static str),
}

/// Errors reported back to the offending sender as an `error` message.
///
/// The `Display` text is exactly what the client sees in `message`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("Room not found")]
    RoomNotFound,

    #[error("Already in a room")]
    AlreadyBound,
}
