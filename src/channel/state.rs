//! Consumer-visible channel states

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of the logical channel as seen by the consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// A transport handle is being opened
    Connecting,
    /// The transport is open and the heartbeat is running
    Connected,
    /// The transport closed; a reconnect may be pending
    Disconnected,
    /// Open failed, or the reconnect budget is spent
    Error,
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Disconnected
    }
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Error => "error",
        }
    }

    /// Whether moving from `self` to `next` is an edge of the state machine
    ///
    /// `connect()` may be called from anywhere, so every state may move to
    /// `Connecting`. `Connected` only leaves through a close (or a new
    /// `connect()`), never straight to `Error`.
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        match (self, next) {
            (_, Connecting) => true,
            (Connecting, Connected) => true,
            (Connecting, Error) => true,
            (Connecting | Connected | Error, Disconnected) => true,
            (Disconnected, Error) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Readiness of the current transport handle
///
/// A handle being torn down is already superseded, so it reads `Closed`
/// straight away; there is no separate closing phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadyState {
    Connecting,
    Open,
    Closed,
}

impl Default for ReadyState {
    fn default() -> Self {
        ReadyState::Closed
    }
}

impl ReadyState {
    /// Numeric code matching the WebSocket `readyState` convention
    pub fn code(&self) -> u8 {
        match self {
            ReadyState::Connecting => 0,
            ReadyState::Open => 1,
            ReadyState::Closed => 3,
        }
    }
}
