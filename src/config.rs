#![forbid(unsafe_code)]

// Relay configuration, loaded from environment variables at startup.

use anyhow::Context;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_STATIC_DIR: &str = "public";
const DEFAULT_MAX_CONNECTIONS: usize = 10_000;
const DEFAULT_MAX_MESSAGE_SIZE: usize = 65_536;
/// Per-client outbound queue. Signaling is bursty only during negotiation
/// (one offer plus a handful of candidates per viewer), so 64 is ample.
const DEFAULT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub port: u16,
    /// Directory holding `index.html`, `client.js` and `style.css`
    pub static_dir: PathBuf,
    pub max_connections: usize,
    pub max_message_size: usize,
    pub channel_capacity: usize,
    /// Enables `/health` and `/metrics` behind `Authorization: Bearer <token>`
    pub metrics_token: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            static_dir: PathBuf::from(DEFAULT_STATIC_DIR),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            metrics_token: None,
        }
    }
}

impl RelayConfig {
    /// Reads `PORT`, `STATIC_DIR`, `MAX_CONNECTIONS`, `MAX_MESSAGE_SIZE`,
    /// `CHANNEL_CAPACITY` and `METRICS_TOKEN`.
    ///
    /// # Errors
    /// Returns an error if a numeric variable is set but does not parse
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();

        let mut max_connections = parse_var(&lookup, "MAX_CONNECTIONS")?.unwrap_or(defaults.max_connections);
        if max_connections == 0 {
            warn!("MAX_CONNECTIONS=0 would reject all connections, using default {}", DEFAULT_MAX_CONNECTIONS);
            max_connections = DEFAULT_MAX_CONNECTIONS;
        }

        let mut channel_capacity = parse_var(&lookup, "CHANNEL_CAPACITY")?.unwrap_or(defaults.channel_capacity);
        if channel_capacity == 0 {
            warn!("CHANNEL_CAPACITY must be positive, using default {}", DEFAULT_CHANNEL_CAPACITY);
            channel_capacity = DEFAULT_CHANNEL_CAPACITY;
        }

        Ok(Self {
            port: parse_var(&lookup, "PORT")?.unwrap_or(defaults.port),
            static_dir: lookup("STATIC_DIR").map(PathBuf::from).unwrap_or(defaults.static_dir),
            max_connections,
            max_message_size: parse_var(&lookup, "MAX_MESSAGE_SIZE")?.unwrap_or(defaults.max_message_size),
            channel_capacity,
            metrics_token: lookup("METRICS_TOKEN").filter(|t| !t.is_empty()),
        })
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|raw| raw.trim().parse::<T>().with_context(|| format!("Invalid {key}: {raw}")))
        .transpose()
}
