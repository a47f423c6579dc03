use thiserror::Error;

/// Errors produced by the rctl session and transport layers.
#[derive(Debug, Error)]
pub enum RctlError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("disconnected: {0}")]
    Disconnected(String),

    #[error("command {seq} failed after retry")]
    CommandFailed { seq: u64 },

    #[error("reconnect gave up after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("session closed")]
    SessionClosed,

    #[error("timeout")]
    Timeout,
}

pub type RctlResult<T> = Result<T, RctlError>;
