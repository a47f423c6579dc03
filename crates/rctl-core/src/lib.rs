//! rctl-core: Shared protocol library for the rctl remote-control client.
//!
//! Provides the closed set of remote commands and their wire tokens, the
//! connection state and output line types observed by front-ends, the error
//! taxonomy, and the abstract line transport traits.

pub mod command;
pub mod error;
pub mod output;
pub mod state;
pub mod transport;

// Re-export commonly used items at crate root.
pub use command::{Command, CommandKind};
pub use error::{RctlError, RctlResult};
pub use output::OutputLine;
pub use state::ConnectionState;
pub use transport::{BoxFuture, Connector, LineReader, LineWriter, Transport};
