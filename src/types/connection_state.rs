//! Connection state of the transport

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;

/// Lifecycle state of the connection to a tracking device.
///
/// Only the transport client writes this; everything else observes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum ConnectionState {
    /// No connection, possibly waiting for the next reconnect attempt
    #[default]
    Disconnected,
    /// A connection attempt is in flight
    Connecting,
    /// Connected and receiving data
    Connected,
    /// Connected, but no frame decoded within the staleness window
    Degraded,
    /// Reconnect ceiling reached; stays here until an explicit restart
    Failed,
}

impl ConnectionState {
    /// Whether a socket is currently open.
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Degraded)
    }

    /// Whether the state only changes through an explicit restart.
    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Failed
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Degraded => "Degraded",
            ConnectionState::Failed => "Failed",
        };
        f.write_str(label)
    }
}

/// A single observed state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub at: Instant,
}
