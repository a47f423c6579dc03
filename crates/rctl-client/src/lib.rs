//! rctl-client: session library for the rctl remote-control client.
//!
//! Keeps a session to a media endpoint alive over TCP or WebSocket, delivers
//! commands in submission order with one retry across reconnects, and buffers
//! the endpoint's output lines for display.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use rctl_client::{ChannelObserver, SessionConfig, SessionManager};
//! use rctl_core::CommandKind;
//!
//! # async fn example() -> rctl_core::RctlResult<()> {
//! let (observer, mut events) = ChannelObserver::new();
//! let session = SessionManager::new(
//!     "tcp://mediabox.local:7000",
//!     SessionConfig::default(),
//!     Arc::new(observer),
//! )?;
//!
//! session.submit(CommandKind::Play);
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod observer;
pub mod output_log;
pub mod queue;
pub mod session;
pub mod transport;

// Re-export primary public types.
pub use config::{BackoffConfig, SessionConfig};
pub use observer::{ChannelObserver, CommandOutcome, NoopObserver, SessionEvent, SessionObserver};
pub use output_log::OutputLog;
pub use queue::{CommandQueue, DeliveryState, PendingCommand};
pub use session::SessionManager;
pub use transport::{AutoConnector, TransportKind};

// Re-export rctl-core types for convenience.
pub use rctl_core::{CommandKind, ConnectionState, OutputLine, RctlError, RctlResult};
