//! Real-time gateway connection
//!
//! Provides the connection lifecycle for the Slack real-time gateway:
//! - Handshake with cookie authentication and the `slack` sub-protocol
//! - Generation-tagged keepalive and forced session refresh
//! - Read loop that classifies control frames and reports transport failure

mod endpoint;
mod manager;

#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use std::time::Duration;

pub use endpoint::{default_endpoint, display_endpoint};
pub use manager::ConnectionManager;

// ─────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────

/// Configuration for the connection manager
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Base URL of the gateway; the token and client parameters are appended
    pub endpoint_base: String,

    /// Team-specific gateway shard
    pub gateway_server: Option<String>,

    /// Origin header for the handshake
    pub origin: Option<String>,

    /// Dial the cached reconnect hint before the default endpoint
    pub use_reconnect_hint: bool,

    /// Handshake timeout
    pub handshake_timeout: Duration,

    /// Keepalive ping cadence
    pub keepalive_interval: Duration,

    /// Forced session refresh cadence
    pub refresh_interval: Duration,

    /// Read deadline; silence longer than this is a dead connection
    pub read_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoint_base: "wss://wss-primary.slack.com/".to_string(),
            gateway_server: None,
            origin: Some("https://app.slack.com".to_string()),
            use_reconnect_hint: true,
            handshake_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(5),
            refresh_interval: Duration::from_secs(300),
            read_timeout: Duration::from_secs(30),
        }
    }
}

/// Session credentials
#[derive(Clone)]
pub struct Credentials {
    /// `xoxc-` client token
    pub token: String,

    /// Full `Cookie` header value
    pub cookie: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials").finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────
// Connection State
// ─────────────────────────────────────────────────────────────────

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No transport
    #[default]
    Disconnected,
    /// Handshake in progress
    Connecting,
    /// Transport open, generation running
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Epoch of one successful connect and the tasks spawned for it
///
/// Generation 0 means no connection has been made yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(u64);

impl Generation {
    pub fn next(self) -> Self {
        Generation(self.0 + 1)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Point-in-time counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionStats {
    pub state: ConnectionState,
    pub generation: Generation,
    pub connect_attempts: u64,
    pub connect_failures: u64,
    pub pings_sent: u64,
    pub pong_mismatches: u64,
    pub reconnect_hints: u64,
}
