//! The session state machine.
//!
//! One driver task owns the connection state, the attempt counter, and the
//! transport halves. Everything that may change them (submissions, explicit
//! reconnect/disconnect, connect results, transport failures, backoff timers)
//! arrives as a `Signal` on a single channel, so transitions are applied one
//! at a time. The receive loop and the drain loop run as separate tasks and
//! report failures back tagged with the epoch they belong to; reports from an
//! older epoch are ignored.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use rctl_core::transport::{Connector, LineReader, LineWriter, Transport};
use rctl_core::{CommandKind, ConnectionState, OutputLine, RctlError, RctlResult};

use crate::config::SessionConfig;
use crate::observer::{CommandOutcome, SessionEvent};
use crate::queue::FailOutcome;

use super::Shared;

type SharedWriter = Arc<Mutex<Box<dyn LineWriter>>>;

/// Inputs to the driver.
pub(crate) enum Signal {
    /// A command was added to the queue.
    Submitted,
    /// Force a fresh connection. `seq` is set when it came from `submit`.
    Reconnect { seq: Option<u64> },
    Disconnect { done: oneshot::Sender<()> },
    Shutdown { done: oneshot::Sender<()> },
    Opened {
        epoch: u64,
        result: RctlResult<Transport>,
    },
    TransportFailed { epoch: u64, error: RctlError },
    BackoffElapsed { epoch: u64 },
}

/// What to do with a command that was in flight when the link went down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InFlight {
    /// The transport broke: counts as a failed write.
    Fail,
    /// The user tore the link down: back to the queue, no failure counted.
    Requeue,
}

/// Tasks and writer of one connected transport.
struct Link {
    writer: SharedWriter,
    connected_at: time::Instant,
    wake: Arc<Notify>,
    reader_task: JoinHandle<()>,
    drain_task: JoinHandle<()>,
}

pub(crate) struct Driver {
    address: String,
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    signals: mpsc::UnboundedSender<Signal>,
    state_tx: watch::Sender<ConnectionState>,

    state: ConnectionState,
    /// Incremented for every connect attempt and every explicit disconnect.
    epoch: u64,
    /// Opens since the last stable link or explicit reconnect. A link that
    /// drops before `backoff.reset_after` does not clear it.
    attempts: u32,
    link: Option<Link>,
    connect_task: Option<JoinHandle<()>>,
    backoff_task: Option<JoinHandle<()>>,
    /// Reconnect commands waiting for the connection they asked for.
    pending_reconnects: Vec<u64>,
}

impl Driver {
    pub(crate) fn new(
        address: String,
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        shared: Arc<Shared>,
        signals: mpsc::UnboundedSender<Signal>,
        state_tx: watch::Sender<ConnectionState>,
    ) -> Self {
        Self {
            address,
            config,
            connector,
            shared,
            signals,
            state_tx,
            state: ConnectionState::Disconnected,
            epoch: 0,
            attempts: 0,
            link: None,
            connect_task: None,
            backoff_task: None,
            pending_reconnects: Vec::new(),
        }
    }

    pub(crate) async fn run(mut self, mut signals: mpsc::UnboundedReceiver<Signal>) {
        while let Some(signal) = signals.recv().await {
            match signal {
                Signal::Submitted => self.on_submitted(),
                Signal::Reconnect { seq } => self.on_reconnect(seq).await,
                Signal::Disconnect { done } => {
                    self.on_disconnect().await;
                    let _ = done.send(());
                }
                Signal::Shutdown { done } => {
                    self.on_disconnect().await;
                    let _ = done.send(());
                    break;
                }
                Signal::Opened { epoch, result } => self.on_opened(epoch, result).await,
                Signal::TransportFailed { epoch, error } => {
                    self.on_transport_failed(epoch, error).await
                }
                Signal::BackoffElapsed { epoch } => self.on_backoff_elapsed(epoch),
            }
        }
        debug!("session driver ended");
    }

    // ── Signal handlers ──────────────────────────────────────────────

    fn on_submitted(&mut self) {
        match self.state {
            ConnectionState::Disconnected => self.begin_connect(),
            ConnectionState::Connected => {
                if let Some(link) = &self.link {
                    link.wake.notify_one();
                }
            }
            state => debug!(%state, "command queued until connected"),
        }
    }

    async fn on_reconnect(&mut self, seq: Option<u64>) {
        info!(state = %self.state, "explicit reconnect");
        if let Some(seq) = seq {
            self.pending_reconnects.push(seq);
        }
        self.cancel_timers();
        self.teardown_link(InFlight::Requeue).await;
        self.attempts = 0;
        // A plain reconnect() from Disconnected is just a connect.
        if seq.is_some() || self.state != ConnectionState::Disconnected {
            self.set_state(ConnectionState::Reconnecting);
        }
        self.begin_connect();
    }

    async fn on_disconnect(&mut self) {
        self.epoch += 1;
        self.cancel_timers();
        self.teardown_link(InFlight::Requeue).await;
        self.attempts = 0;
        self.resolve_reconnects(CommandOutcome::Failed);
        if self.state != ConnectionState::Disconnected {
            info!(address = %self.address, "disconnected");
        }
        self.set_state(ConnectionState::Disconnected);
    }

    async fn on_opened(&mut self, epoch: u64, result: RctlResult<Transport>) {
        if epoch != self.epoch || self.state != ConnectionState::Connecting {
            debug!(epoch, current = self.epoch, "discarding stale connect result");
            if let Ok(mut transport) = result {
                let _ = time::timeout(self.config.write_timeout, transport.close()).await;
            }
            return;
        }
        self.connect_task = None;

        match result {
            Ok(transport) => self.on_connected(transport),
            Err(error) => self.on_connect_failed(error),
        }
    }

    fn on_connected(&mut self, transport: Transport) {
        info!(
            peer = transport.peer(),
            epoch = self.epoch,
            attempt = self.attempts,
            "connected"
        );
        self.set_state(ConnectionState::Connected);

        let (reader, writer) = transport.into_split();
        let writer: SharedWriter = Arc::new(Mutex::new(writer));
        let wake = Arc::new(Notify::new());

        let reader_task = tokio::spawn(receive_loop(
            self.epoch,
            reader,
            self.shared.clone(),
            self.signals.clone(),
        ));
        let drain_task = tokio::spawn(drain_loop(
            self.epoch,
            writer.clone(),
            wake.clone(),
            self.config.write_timeout,
            self.shared.clone(),
            self.signals.clone(),
        ));

        self.link = Some(Link {
            writer,
            connected_at: time::Instant::now(),
            wake,
            reader_task,
            drain_task,
        });
        self.resolve_reconnects(CommandOutcome::Acknowledged);
    }

    fn on_connect_failed(&mut self, error: RctlError) {
        warn!(attempt = self.attempts, %error, "connect failed");
        self.set_state(ConnectionState::Failed);
        self.retry_or_give_up();
    }

    async fn on_transport_failed(&mut self, epoch: u64, error: RctlError) {
        if epoch != self.epoch || self.state != ConnectionState::Connected {
            debug!(epoch, %error, "ignoring failure of a replaced transport");
            return;
        }
        let stable = self
            .link
            .as_ref()
            .is_some_and(|link| link.connected_at.elapsed() >= self.config.backoff.reset_after);
        warn!(%error, stable, "transport failed, reconnecting");
        self.teardown_link(InFlight::Fail).await;
        self.set_state(ConnectionState::Reconnecting);

        if stable {
            self.attempts = 0;
            self.begin_connect();
        } else {
            self.retry_or_give_up();
        }
    }

    fn on_backoff_elapsed(&mut self, epoch: u64) {
        let waiting = matches!(
            self.state,
            ConnectionState::Failed | ConnectionState::Reconnecting
        );
        if epoch != self.epoch || !waiting {
            return;
        }
        if self.backoff_task.take().is_some() {
            self.begin_connect();
        }
    }

    // ── Transitions ──────────────────────────────────────────────────

    /// Schedule the next open after the backoff delay, or stop in `Failed`
    /// once `max_attempts` opens have gone by without a stable link.
    fn retry_or_give_up(&mut self) {
        if !self.config.backoff.should_retry(self.attempts) {
            warn!(attempts = self.attempts, "reconnect attempts exhausted");
            self.set_state(ConnectionState::Failed);
            self.shared.events.emit(SessionEvent::ReconnectExhausted {
                attempts: self.attempts,
            });
            self.resolve_reconnects(CommandOutcome::Failed);
            return;
        }

        let delay = self.config.backoff.delay(self.attempts);
        debug!(?delay, attempt = self.attempts, "scheduling reconnect");
        let epoch = self.epoch;
        let signals = self.signals.clone();
        self.backoff_task = Some(tokio::spawn(async move {
            time::sleep(delay).await;
            let _ = signals.send(Signal::BackoffElapsed { epoch });
        }));
    }

    /// Enter `Connecting` and open a fresh transport in the background.
    fn begin_connect(&mut self) {
        self.cancel_timers();
        self.epoch += 1;
        self.attempts += 1;
        self.set_state(ConnectionState::Connecting);

        let epoch = self.epoch;
        let address = self.address.clone();
        let connector = self.connector.clone();
        let timeout = self.config.connect_timeout;
        let signals = self.signals.clone();
        info!(address = %address, attempt = self.attempts, "opening transport");

        self.connect_task = Some(tokio::spawn(async move {
            let result = match time::timeout(timeout, connector.open(&address)).await {
                Ok(result) => result,
                Err(_) => Err(RctlError::ConnectFailed(format!(
                    "{address}: timed out after {timeout:?}"
                ))),
            };
            let _ = signals.send(Signal::Opened { epoch, result });
        }));
    }

    /// Stop both loops of the current link and close its transport.
    ///
    /// Both tasks are joined before returning, so nothing touches the queue
    /// on behalf of this link afterwards.
    async fn teardown_link(&mut self, in_flight: InFlight) {
        let Some(link) = self.link.take() else {
            return;
        };

        link.reader_task.abort();
        link.drain_task.abort();
        let _ = link.reader_task.await;
        let _ = link.drain_task.await;

        match in_flight {
            InFlight::Fail => {
                if let Some(seq) = self.shared.queue.in_flight() {
                    record_failure(&self.shared, seq);
                }
            }
            InFlight::Requeue => {
                if let Some(seq) = self.shared.queue.cancel_in_flight() {
                    debug!(seq, "in-flight command returned to queue");
                }
            }
        }

        let mut writer = link.writer.lock().await;
        if time::timeout(self.config.write_timeout, writer.close())
            .await
            .is_err()
        {
            debug!("transport close timed out");
        }
    }

    fn cancel_timers(&mut self) {
        if let Some(task) = self.backoff_task.take() {
            task.abort();
        }
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        debug!(from = %self.state, to = %state, "state change");
        self.state = state;
        self.state_tx.send_replace(state);
        self.shared.events.emit(SessionEvent::StateChanged { state });
    }

    fn resolve_reconnects(&mut self, outcome: CommandOutcome) {
        for seq in self.pending_reconnects.drain(..) {
            self.shared.events.emit(SessionEvent::CommandResult {
                seq,
                kind: CommandKind::Reconnect,
                outcome,
            });
        }
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.cancel_timers();
        if let Some(link) = self.link.take() {
            link.reader_task.abort();
            link.drain_task.abort();
        }
    }
}

/// Count a failed write of `seq`; a second failure resolves it as failed.
fn record_failure(shared: &Shared, seq: u64) {
    match shared.queue.mark_failed(seq) {
        FailOutcome::Requeued => {
            warn!(seq, "command interrupted, will retry once after reconnect")
        }
        FailOutcome::Exhausted(command) => {
            warn!(seq, command = %command.kind, "command failed after retry");
            shared.events.emit(SessionEvent::CommandResult {
                seq,
                kind: command.kind,
                outcome: CommandOutcome::Failed,
            });
        }
        FailOutcome::NotInFlight => {}
    }
}

/// Read lines into the output log until the transport fails.
async fn receive_loop(
    epoch: u64,
    mut reader: Box<dyn LineReader>,
    shared: Arc<Shared>,
    signals: mpsc::UnboundedSender<Signal>,
) {
    loop {
        match reader.read_line().await {
            Ok(text) => {
                let line = OutputLine::new(epoch, text);
                shared.log.append(line.clone());
                shared.events.emit(SessionEvent::OutputAppended { line });
            }
            Err(error) => {
                debug!(epoch, %error, "receive loop ended");
                let _ = signals.send(Signal::TransportFailed { epoch, error });
                return;
            }
        }
    }
}

/// Write queued commands one at a time, head first, until a write fails.
async fn drain_loop(
    epoch: u64,
    writer: SharedWriter,
    wake: Arc<Notify>,
    write_timeout: std::time::Duration,
    shared: Arc<Shared>,
    signals: mpsc::UnboundedSender<Signal>,
) {
    loop {
        let Some(head) = shared.queue.peek_head() else {
            wake.notified().await;
            continue;
        };
        let seq = head.seq();

        if !shared.queue.mark_sent(seq) {
            warn!(seq, state = ?head.state, "queue head already in flight, resetting");
            shared.queue.cancel_in_flight();
            continue;
        }

        let line = head.line;
        debug!(seq, command = %head.command.kind, attempt = head.failures + 1, "sending");
        let result = {
            let mut writer = writer.lock().await;
            match time::timeout(write_timeout, writer.write_line(line)).await {
                Ok(result) => result,
                Err(_) => Err(RctlError::WriteFailed(format!(
                    "write timed out after {write_timeout:?}"
                ))),
            }
        };

        match result {
            Ok(()) => {
                if let Some(done) = shared.queue.mark_acknowledged(seq) {
                    debug!(seq, "acknowledged");
                    shared.events.emit(SessionEvent::CommandResult {
                        seq,
                        kind: done.command.kind,
                        outcome: CommandOutcome::Acknowledged,
                    });
                }
            }
            Err(error) => {
                warn!(seq, %error, "write failed");
                record_failure(&shared, seq);
                let _ = signals.send(Signal::TransportFailed { epoch, error });
                return;
            }
        }
    }
}
