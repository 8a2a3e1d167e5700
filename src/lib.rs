#![forbid(unsafe_code)]

// screencast-relay library - rendezvous and signaling relay for peer-to-peer screen broadcasts

pub mod config;
pub mod error;
pub mod metrics;
pub mod room;
pub mod session;
pub mod signaling;
