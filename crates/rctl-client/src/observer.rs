//! Observer surface for front-ends.
//!
//! Every session owns one dispatcher task that delivers events to its
//! observer in emission order, so callbacks never run concurrently with each
//! other.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use rctl_core::{CommandKind, ConnectionState, OutputLine};

/// Final result of a submitted command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandOutcome {
    Acknowledged,
    Failed,
}

/// Something a front-end may want to react to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged {
        state: ConnectionState,
    },
    OutputAppended {
        line: OutputLine,
    },
    CommandResult {
        seq: u64,
        kind: CommandKind,
        outcome: CommandOutcome,
    },
    /// The backoff cap was reached; only an explicit reconnect continues.
    ReconnectExhausted {
        attempts: u32,
    },
}

/// Callbacks invoked by the session's dispatcher task.
pub trait SessionObserver: Send + Sync + 'static {
    fn on_state_changed(&self, _state: ConnectionState) {}

    fn on_output_appended(&self, _line: &OutputLine) {}

    fn on_command_result(&self, _seq: u64, _outcome: CommandOutcome) {}

    fn on_reconnect_exhausted(&self, _attempts: u32) {}

    /// Called for every event. The default routes to the callbacks above.
    fn on_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::StateChanged { state } => self.on_state_changed(*state),
            SessionEvent::OutputAppended { line } => self.on_output_appended(line),
            SessionEvent::CommandResult { seq, outcome, .. } => {
                self.on_command_result(*seq, *outcome)
            }
            SessionEvent::ReconnectExhausted { attempts } => {
                self.on_reconnect_exhausted(*attempts)
            }
        }
    }
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

/// Observer that forwards every event into a channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl SessionObserver for ChannelObserver {
    fn on_event(&self, event: &SessionEvent) {
        let _ = self.tx.send(event.clone());
    }
}

/// Sending side used by the session's tasks.
#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSink {
    pub(crate) fn emit(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("observer dispatcher gone, event dropped");
        }
    }
}

/// Spawn the dispatcher task for `observer`.
pub(crate) fn spawn_dispatcher(observer: Arc<dyn SessionObserver>) -> (EventSink, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<SessionEvent>();
    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            observer.on_event(&event);
        }
        tracing::debug!("observer dispatcher ended");
    });
    (EventSink { tx }, handle)
}
