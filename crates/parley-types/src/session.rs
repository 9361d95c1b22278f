//! Session lifecycle events and realtime connection state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// State of the realtime connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Never connected, or not yet asked to.
    Idle,
    Connecting,
    Open,
    /// Waiting out the backoff delay before the next attempt.
    Reconnecting,
    /// Explicitly disconnected. Terminal until the next `connect()`.
    Closed,
}

impl ConnectionState {
    /// States in which a background connection task is alive.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Reconnecting
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "idle"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Authentication lifecycle notifications published by the session gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Credentials installed by login or register.
    Authenticated { user_id: String },
    /// Credentials replaced by a successful renewal.
    Renewed,
    /// Renewal failed; credentials were cleared.
    Expired { reason: String },
    /// The user logged out.
    LoggedOut,
}
