//! Remote commands and their line-protocol tokens.
//!
//! Wire format: one upper-case token per line, newline-terminated
//! (`PLAY\n`, `PREV\n`, `NEXT\n`, `VOLUP\n`, `VOLDOWN\n`). `Reconnect` is
//! handled by the session itself and never reaches the wire.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RctlError;

/// The closed set of actions a user can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Play,
    Prev,
    Next,
    VolUp,
    VolDown,
    Reconnect,
}

impl CommandKind {
    /// Every command kind, in button order.
    pub const ALL: [CommandKind; 6] = [
        Self::Play,
        Self::Prev,
        Self::Next,
        Self::VolUp,
        Self::VolDown,
        Self::Reconnect,
    ];

    /// The token written to the endpoint, or `None` for session-local commands.
    pub fn wire_token(self) -> Option<&'static str> {
        match self {
            Self::Play => Some("PLAY"),
            Self::Prev => Some("PREV"),
            Self::Next => Some("NEXT"),
            Self::VolUp => Some("VOLUP"),
            Self::VolDown => Some("VOLDOWN"),
            Self::Reconnect => None,
        }
    }

    /// Lower-case name used in CLI input and logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::Play => "play",
            Self::Prev => "prev",
            Self::Next => "next",
            Self::VolUp => "volup",
            Self::VolDown => "voldown",
            Self::Reconnect => "reconnect",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CommandKind {
    type Err = RctlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "play" => Ok(Self::Play),
            "prev" | "previous" => Ok(Self::Prev),
            "next" => Ok(Self::Next),
            "volup" | "vol-up" | "volume-up" => Ok(Self::VolUp),
            "voldown" | "vol-down" | "volume-down" => Ok(Self::VolDown),
            "reconnect" => Ok(Self::Reconnect),
            _ => Err(RctlError::UnknownCommand(s.to_string())),
        }
    }
}

/// A submitted command with its sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub seq: u64,
    pub kind: CommandKind,
}

impl Command {
    pub fn new(seq: u64, kind: CommandKind) -> Self {
        Self { seq, kind }
    }
}
