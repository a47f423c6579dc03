use std::fmt;

use serde::{Deserialize, Serialize};

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No transport, no pending connect or backoff.
    Disconnected,
    /// A transport is being opened.
    Connecting,
    /// A transport is open and both loops are running.
    Connected,
    /// The transport failed; a fresh one is about to be opened.
    Reconnecting,
    /// The last open failed. Either a backoff timer is pending or the attempt
    /// cap was reached and only an explicit reconnect leaves this state.
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}
