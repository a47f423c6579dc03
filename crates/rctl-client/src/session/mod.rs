//! Client-side remote-control session.
//!
//! `SessionManager` keeps one logical session to one endpoint alive across
//! transport failures. Commands are queued synchronously by `submit` and
//! delivered in order by a background drain loop; lines received from the
//! endpoint land in the session's `OutputLog`. State changes, received lines
//! and command results are reported to a `SessionObserver`.

mod driver;
#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::debug;

use rctl_core::transport::Connector;
use rctl_core::{CommandKind, ConnectionState, RctlError, RctlResult};

use crate::config::SessionConfig;
use crate::observer::{spawn_dispatcher, EventSink, SessionObserver};
use crate::output_log::OutputLog;
use crate::queue::{CommandQueue, PendingCommand};
use crate::transport::{validate_address, AutoConnector};

use driver::{Driver, Signal};

/// State shared between the driver and the I/O loops. Both members carry
/// their own synchronization.
pub(crate) struct Shared {
    pub(crate) queue: CommandQueue,
    pub(crate) log: OutputLog,
    pub(crate) events: EventSink,
}

/// A reconnecting session to one remote-control endpoint.
///
/// Must be created inside a tokio runtime.
pub struct SessionManager {
    address: String,
    shared: Arc<Shared>,
    signals: mpsc::UnboundedSender<Signal>,
    state_rx: watch::Receiver<ConnectionState>,
    driver: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl SessionManager {
    /// Create a session that picks its transport from the address scheme.
    ///
    /// Nothing is opened until the first command is submitted or
    /// `reconnect` is called.
    pub fn new(
        address: impl Into<String>,
        config: SessionConfig,
        observer: Arc<dyn SessionObserver>,
    ) -> RctlResult<Self> {
        let address = address.into();
        validate_address(&address)?;
        Ok(Self::with_connector(
            address,
            config,
            Arc::new(AutoConnector),
            observer,
        ))
    }

    /// Create a session that opens transports through `connector`.
    pub fn with_connector(
        address: impl Into<String>,
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        let address = address.into();
        let (events, dispatcher) = spawn_dispatcher(observer);
        let shared = Arc::new(Shared {
            queue: CommandQueue::new(),
            log: OutputLog::new(config.log_capacity),
            events,
        });

        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let driver = Driver::new(
            address.clone(),
            config,
            connector,
            shared.clone(),
            signals_tx.clone(),
            state_tx,
        );
        let driver = tokio::spawn(driver.run(signals_rx));

        Self {
            address,
            shared,
            signals: signals_tx,
            state_rx,
            driver: Some(driver),
            dispatcher: Some(dispatcher),
        }
    }

    /// The endpoint address this session connects to.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Queue a command and return its sequence number. Never blocks.
    ///
    /// `Reconnect` is not queued: it forces a fresh connection and resets the
    /// attempt counter. Its result is reported once that connection is up.
    pub fn submit(&self, kind: CommandKind) -> u64 {
        match self.shared.queue.enqueue(kind) {
            Some(seq) => {
                debug!(seq, command = %kind, "submitted");
                self.signal(Signal::Submitted);
                seq
            }
            None => {
                let seq = self.shared.queue.reserve_seq();
                self.signal(Signal::Reconnect { seq: Some(seq) });
                seq
            }
        }
    }

    /// Force a fresh connection, resetting the attempt counter.
    pub fn reconnect(&self) {
        self.signal(Signal::Reconnect { seq: None });
    }

    /// Close the transport and stop reconnecting.
    ///
    /// Queued commands are kept; an in-flight command goes back to the queue.
    pub async fn disconnect(&self) {
        let (done, wait) = oneshot::channel();
        self.signal(Signal::Disconnect { done });
        let _ = wait.await;
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Receiver for the latest connection state.
    ///
    /// A `watch` receiver only sees the most recent value, so quick
    /// transitions may be skipped. Observers get every transition through
    /// `SessionEvent::StateChanged`.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Wait until the session reaches `target`, or fail after `timeout`.
    ///
    /// Like `subscribe_state`, this can miss a state that is entered and left
    /// before the waiting task runs.
    pub async fn wait_for_state(
        &self,
        target: ConnectionState,
        timeout: Duration,
    ) -> RctlResult<()> {
        let mut rx = self.state_rx.clone();
        let wait = async move {
            loop {
                if *rx.borrow_and_update() == target {
                    return Ok(());
                }
                if rx.changed().await.is_err() {
                    return Err(RctlError::SessionClosed);
                }
            }
        };
        time::timeout(timeout, wait)
            .await
            .unwrap_or(Err(RctlError::Timeout))
    }

    /// Lines received from the endpoint.
    pub fn output(&self) -> &OutputLog {
        &self.shared.log
    }

    /// Commands not yet acknowledged, head first.
    pub fn pending(&self) -> Vec<PendingCommand> {
        self.shared.queue.snapshot()
    }

    /// Disconnect, stop the session's tasks, and deliver outstanding events.
    pub async fn shutdown(mut self) {
        let (done, wait) = oneshot::channel();
        self.signal(Signal::Shutdown { done });
        let _ = wait.await;

        if let Some(driver) = self.driver.take() {
            let _ = driver.await;
        }
        let dispatcher = self.dispatcher.take();
        // Dropping the last event sink lets the dispatcher drain and exit.
        drop(self);
        if let Some(dispatcher) = dispatcher {
            let _ = time::timeout(Duration::from_secs(1), dispatcher).await;
        }
    }

    fn signal(&self, signal: Signal) {
        if self.signals.send(signal).is_err() {
            debug!("session driver is gone");
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("address", &self.address)
            .field("state", &self.state())
            .field("pending", &self.shared.queue.len())
            .finish()
    }
}
