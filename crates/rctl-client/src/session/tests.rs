//! State machine scenarios against a scripted in-memory endpoint.

use super::*;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Instant;

use rctl_core::transport::{BoxFuture, LineReader, LineWriter, Transport};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Notify;

use crate::config::BackoffConfig;
use crate::observer::{ChannelObserver, CommandOutcome, SessionEvent};
use crate::queue::DeliveryState;

use rctl_core::ConnectionState::*;

const WAIT: Duration = Duration::from_secs(5);

/// Behaviour of one accepted connection.
#[derive(Clone, Default)]
struct Endpoint {
    /// Lines the endpoint sends right after accepting.
    lines: Vec<String>,
    /// Close the connection once `lines` are sent.
    hangup: bool,
    /// Zero-based write indices that fail on this connection.
    fail_writes: Vec<usize>,
    /// Writes never complete.
    stall_writes: bool,
    /// Close the connection as soon as a write starts.
    hangup_after_write: bool,
}

#[derive(Clone)]
enum Plan {
    Refuse,
    Hang,
    Accept(Endpoint),
}

#[derive(Default)]
struct Wire {
    attempted: StdMutex<Vec<String>>,
    delivered: StdMutex<Vec<String>>,
    closes: AtomicU32,
}

struct MockConnector {
    plans: StdMutex<VecDeque<Plan>>,
    fallback: Plan,
    opens: AtomicU32,
    wire: Arc<Wire>,
}

impl MockConnector {
    fn new(plans: Vec<Plan>, fallback: Plan) -> Arc<Self> {
        Arc::new(Self {
            plans: StdMutex::new(plans.into()),
            fallback,
            opens: AtomicU32::new(0),
            wire: Arc::new(Wire::default()),
        })
    }

    fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    fn attempted(&self) -> Vec<String> {
        self.wire.attempted.lock().unwrap().clone()
    }

    fn delivered(&self) -> Vec<String> {
        self.wire.delivered.lock().unwrap().clone()
    }

    fn closes(&self) -> u32 {
        self.wire.closes.load(Ordering::SeqCst)
    }

    fn next_plan(&self) -> Plan {
        self.plans
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

impl Connector for MockConnector {
    fn open<'a>(&'a self, address: &'a str) -> BoxFuture<'a, RctlResult<Transport>> {
        Box::pin(async move {
            self.opens.fetch_add(1, Ordering::SeqCst);
            match self.next_plan() {
                Plan::Refuse => Err(RctlError::ConnectFailed(format!("{address}: refused"))),
                Plan::Hang => std::future::pending().await,
                Plan::Accept(endpoint) => {
                    let written = Arc::new(Notify::new());
                    let reader = MockReader {
                        lines: endpoint.lines.into(),
                        hangup: endpoint.hangup,
                        hangup_on: endpoint.hangup_after_write.then(|| written.clone()),
                    };
                    let writer = MockWriter {
                        wire: self.wire.clone(),
                        written,
                        writes: 0,
                        fail_writes: endpoint.fail_writes,
                        stall: endpoint.stall_writes,
                    };
                    Ok(Transport::new(address, Box::new(reader), Box::new(writer)))
                }
            }
        })
    }
}

struct MockReader {
    lines: VecDeque<String>,
    hangup: bool,
    hangup_on: Option<Arc<Notify>>,
}

impl LineReader for MockReader {
    fn read_line(&mut self) -> BoxFuture<'_, RctlResult<String>> {
        Box::pin(async move {
            if let Some(line) = self.lines.pop_front() {
                return Ok(line);
            }
            if self.hangup {
                return Err(RctlError::Disconnected("peer hung up".into()));
            }
            if let Some(written) = &self.hangup_on {
                written.notified().await;
                return Err(RctlError::Disconnected("peer hung up mid-write".into()));
            }
            std::future::pending().await
        })
    }
}

struct MockWriter {
    wire: Arc<Wire>,
    written: Arc<Notify>,
    writes: usize,
    fail_writes: Vec<usize>,
    stall: bool,
}

impl LineWriter for MockWriter {
    fn write_line<'a>(&'a mut self, line: &'a str) -> BoxFuture<'a, RctlResult<()>> {
        Box::pin(async move {
            self.wire.attempted.lock().unwrap().push(line.to_string());
            let index = self.writes;
            self.writes += 1;
            self.written.notify_one();

            if self.stall {
                return std::future::pending().await;
            }
            if self.fail_writes.contains(&index) {
                return Err(RctlError::WriteFailed("broken pipe".into()));
            }
            self.wire.delivered.lock().unwrap().push(line.to_string());
            Ok(())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, RctlResult<()>> {
        Box::pin(async move {
            self.wire.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

fn fast_config() -> SessionConfig {
    SessionConfig {
        log_capacity: 500,
        connect_timeout: Duration::from_secs(1),
        write_timeout: Duration::from_secs(1),
        backoff: BackoffConfig {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(4),
            max_attempts: 5,
            jitter: false,
            reset_after: Duration::from_secs(1),
        },
    }
}

fn accept() -> Plan {
    Plan::Accept(Endpoint::default())
}

fn failing_writes(indices: &[usize]) -> Plan {
    Plan::Accept(Endpoint {
        fail_writes: indices.to_vec(),
        ..Endpoint::default()
    })
}

struct Harness {
    session: SessionManager,
    connector: Arc<MockConnector>,
    events: UnboundedReceiver<SessionEvent>,
    seen: Vec<SessionEvent>,
}

impl Harness {
    fn new(plans: Vec<Plan>, fallback: Plan) -> Self {
        Self::with_config(plans, fallback, fast_config())
    }

    fn with_config(plans: Vec<Plan>, fallback: Plan, config: SessionConfig) -> Self {
        let connector = MockConnector::new(plans, fallback);
        let (observer, events) = ChannelObserver::new();
        let session = SessionManager::with_connector(
            "mock://endpoint",
            config,
            connector.clone(),
            Arc::new(observer),
        );
        Self {
            session,
            connector,
            events,
            seen: Vec::new(),
        }
    }

    /// Collect events until one matches `pred`.
    async fn until(&mut self, pred: impl Fn(&SessionEvent) -> bool) -> SessionEvent {
        let events = &mut self.events;
        let seen = &mut self.seen;
        time::timeout(WAIT, async {
            loop {
                let event = events.recv().await.expect("event stream closed");
                seen.push(event.clone());
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    async fn result_of(&mut self, seq: u64) -> CommandOutcome {
        if let Some(outcome) = self.find_result(seq) {
            return outcome;
        }
        self.until(|e| matches!(e, SessionEvent::CommandResult { seq: s, .. } if *s == seq))
            .await;
        self.find_result(seq).unwrap()
    }

    fn find_result(&self, seq: u64) -> Option<CommandOutcome> {
        self.seen.iter().find_map(|e| match e {
            SessionEvent::CommandResult { seq: s, outcome, .. } if *s == seq => Some(*outcome),
            _ => None,
        })
    }

    fn results(&self) -> Vec<(u64, CommandOutcome)> {
        self.seen
            .iter()
            .filter_map(|e| match e {
                SessionEvent::CommandResult { seq, outcome, .. } => Some((*seq, *outcome)),
                _ => None,
            })
            .collect()
    }

    fn states(&self) -> Vec<ConnectionState> {
        self.seen
            .iter()
            .filter_map(|e| match e {
                SessionEvent::StateChanged { state } => Some(*state),
                _ => None,
            })
            .collect()
    }

    /// Move whatever has already arrived into `seen`.
    fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.seen.push(event);
        }
    }

    /// Let the session settle so that anything it would still do, it does.
    async fn settle(&self) {
        time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn submit_while_disconnected_connects_and_acknowledges() {
    let mut h = Harness::new(vec![], accept());
    assert_eq!(h.session.state(), Disconnected);

    let seq = h.session.submit(CommandKind::Play);
    assert_eq!(h.result_of(seq).await, CommandOutcome::Acknowledged);

    assert_eq!(h.states(), vec![Connecting, Connected]);
    assert_eq!(h.connector.delivered(), vec!["PLAY"]);
    assert_eq!(h.results(), vec![(seq, CommandOutcome::Acknowledged)]);
    assert!(h.session.pending().is_empty());
    assert_eq!(h.session.state(), Connected);
}

#[tokio::test]
async fn write_failure_retries_once_after_reconnect() {
    let mut h = Harness::new(vec![failing_writes(&[0])], accept());

    let seq = h.session.submit(CommandKind::Play);
    assert_eq!(h.result_of(seq).await, CommandOutcome::Acknowledged);
    h.settle().await;

    assert_eq!(h.connector.attempted(), vec!["PLAY", "PLAY"]);
    assert_eq!(h.connector.delivered(), vec!["PLAY"]);
    assert_eq!(h.connector.opens(), 2);
    assert_eq!(h.connector.closes(), 1);
    assert_eq!(h.results(), vec![(seq, CommandOutcome::Acknowledged)]);
    assert_eq!(
        h.states(),
        vec![Connecting, Connected, Reconnecting, Connecting, Connected]
    );
}

#[tokio::test]
async fn second_write_failure_is_terminal() {
    let mut h = Harness::new(vec![failing_writes(&[0]), failing_writes(&[0])], accept());

    let play = h.session.submit(CommandKind::Play);
    assert_eq!(h.result_of(play).await, CommandOutcome::Failed);

    let next = h.session.submit(CommandKind::Next);
    assert_eq!(h.result_of(next).await, CommandOutcome::Acknowledged);
    h.settle().await;

    // PLAY was tried on two connections and never a third time.
    assert_eq!(h.connector.attempted(), vec!["PLAY", "PLAY", "NEXT"]);
    assert_eq!(h.connector.delivered(), vec!["NEXT"]);
    assert_eq!(
        h.results(),
        vec![
            (play, CommandOutcome::Failed),
            (next, CommandOutcome::Acknowledged)
        ]
    );
}

#[tokio::test]
async fn delivery_order_survives_failures() {
    let mut h = Harness::new(vec![failing_writes(&[1]), failing_writes(&[2])], accept());

    let kinds = [
        CommandKind::Play,
        CommandKind::Next,
        CommandKind::Prev,
        CommandKind::VolUp,
        CommandKind::VolDown,
    ];
    let seqs: Vec<u64> = kinds.iter().map(|k| h.session.submit(*k)).collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));

    let last = *seqs.last().unwrap();
    assert_eq!(h.result_of(last).await, CommandOutcome::Acknowledged);

    assert_eq!(
        h.connector.delivered(),
        vec!["PLAY", "NEXT", "PREV", "VOLUP", "VOLDOWN"]
    );
    assert_eq!(
        h.connector.attempted(),
        vec!["PLAY", "NEXT", "NEXT", "PREV", "VOLUP", "VOLUP", "VOLDOWN"]
    );
    let acked: Vec<u64> = h.results().into_iter().map(|(seq, _)| seq).collect();
    assert_eq!(acked, seqs);
}

#[tokio::test]
async fn connect_attempts_stop_at_cap_until_explicit_reconnect() {
    let mut h = Harness::new(vec![Plan::Refuse; 5], accept());

    let play = h.session.submit(CommandKind::Play);
    let exhausted = h
        .until(|e| matches!(e, SessionEvent::ReconnectExhausted { .. }))
        .await;
    assert_eq!(exhausted, SessionEvent::ReconnectExhausted { attempts: 5 });

    // Further submissions do not restart the cycle.
    let next = h.session.submit(CommandKind::Next);
    h.settle().await;
    assert_eq!(h.connector.opens(), 5);
    assert_eq!(h.session.state(), Failed);
    assert_eq!(h.session.pending().len(), 2);
    assert_eq!(
        h.states(),
        vec![
            Connecting, Failed, Connecting, Failed, Connecting, Failed, Connecting, Failed,
            Connecting, Failed
        ]
    );

    let reconnect = h.session.submit(CommandKind::Reconnect);
    assert!(reconnect > next);
    assert_eq!(h.result_of(reconnect).await, CommandOutcome::Acknowledged);
    assert_eq!(h.result_of(play).await, CommandOutcome::Acknowledged);
    assert_eq!(h.result_of(next).await, CommandOutcome::Acknowledged);
    assert_eq!(h.connector.opens(), 6);
    assert_eq!(h.connector.delivered(), vec!["PLAY", "NEXT"]);
}

#[tokio::test]
async fn backoff_recovers_before_cap() {
    let mut h = Harness::new(vec![Plan::Refuse, Plan::Refuse], accept());

    let seq = h.session.submit(CommandKind::VolUp);
    assert_eq!(h.result_of(seq).await, CommandOutcome::Acknowledged);
    assert_eq!(h.connector.opens(), 3);
    assert_eq!(
        h.states(),
        vec![Connecting, Failed, Connecting, Failed, Connecting, Connected]
    );
}

#[tokio::test]
async fn read_failure_triggers_reconnect() {
    let first = Plan::Accept(Endpoint {
        lines: vec!["hello".into()],
        hangup: true,
        ..Endpoint::default()
    });
    let second = Plan::Accept(Endpoint {
        lines: vec!["again".into()],
        ..Endpoint::default()
    });
    let mut h = Harness::new(vec![first], second);

    h.session.reconnect();
    h.until(|e| matches!(e, SessionEvent::OutputAppended { line } if line.text == "again"))
        .await;

    let log = h.session.output().snapshot();
    let texts: Vec<&str> = log.iter().map(|l| l.text.as_str()).collect();
    assert_eq!(texts, vec!["hello", "again"]);
    assert!(log[0].epoch < log[1].epoch);
    assert_eq!(h.connector.closes(), 1);
    assert_eq!(
        h.states(),
        vec![Connecting, Connected, Reconnecting, Connecting, Connected]
    );
}

#[tokio::test]
async fn output_log_keeps_newest_lines() {
    let lines: Vec<String> = (1..=600).map(|n| format!("line {n}")).collect();
    let mut h = Harness::new(
        vec![],
        Plan::Accept(Endpoint {
            lines,
            ..Endpoint::default()
        }),
    );

    h.session.reconnect();
    h.until(|e| matches!(e, SessionEvent::OutputAppended { line } if line.text == "line 600"))
        .await;

    let snapshot = h.session.output().snapshot();
    assert_eq!(snapshot.len(), 500);
    for (i, line) in snapshot.iter().enumerate() {
        assert_eq!(line.text, format!("line {}", i + 101));
    }
    assert_eq!(h.session.output().total_appended(), 600);
}

#[tokio::test]
async fn disconnect_keeps_queue_when_nothing_in_flight() {
    let h = Harness::new(vec![], Plan::Hang);

    h.session.submit(CommandKind::Play);
    h.session.submit(CommandKind::Next);
    h.session
        .wait_for_state(Connecting, WAIT)
        .await
        .unwrap();
    let before = h.session.pending();
    assert_eq!(before.len(), 2);

    h.session.disconnect().await;
    assert_eq!(h.session.state(), Disconnected);
    assert_eq!(h.session.pending(), before);

    h.session.reconnect();
    h.session
        .wait_for_state(Connecting, WAIT)
        .await
        .unwrap();
    h.settle().await;
    assert_eq!(h.session.pending(), before);
    assert_eq!(h.connector.opens(), 2);
}

#[tokio::test]
async fn disconnect_requeues_in_flight_command() {
    let config = SessionConfig {
        write_timeout: Duration::from_secs(30),
        ..fast_config()
    };
    let mut h = Harness::with_config(
        vec![],
        Plan::Accept(Endpoint {
            stall_writes: true,
            ..Endpoint::default()
        }),
        config,
    );

    let seq = h.session.submit(CommandKind::Play);
    time::timeout(WAIT, async {
        while h.session.pending().first().map(|p| p.state) != Some(DeliveryState::Sent) {
            time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("command never went in flight");

    let started = Instant::now();
    h.session.disconnect().await;
    assert!(started.elapsed() < Duration::from_secs(1));

    let pending = h.session.pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].seq(), seq);
    assert_eq!(pending[0].state, DeliveryState::Queued);
    assert_eq!(pending[0].failures, 0);
    assert_eq!(h.session.state(), Disconnected);
    assert_eq!(h.connector.closes(), 1);

    h.until(|e| matches!(e, SessionEvent::StateChanged { state: Disconnected }))
        .await;
    assert!(h.find_result(seq).is_none());
}

#[tokio::test]
async fn disconnect_cancels_backoff() {
    let config = SessionConfig {
        backoff: BackoffConfig {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(400),
            ..fast_config().backoff
        },
        ..fast_config()
    };
    let mut h = Harness::with_config(vec![], Plan::Refuse, config);

    h.session.submit(CommandKind::Play);
    h.until(|e| matches!(e, SessionEvent::StateChanged { state: Failed }))
        .await;
    h.session.disconnect().await;

    time::sleep(Duration::from_millis(250)).await;
    assert_eq!(h.connector.opens(), 1);
    assert_eq!(h.session.state(), Disconnected);
    assert_eq!(h.session.pending().len(), 1);
}

#[tokio::test]
async fn reconnect_command_replaces_live_transport() {
    let mut h = Harness::new(vec![], accept());

    let play = h.session.submit(CommandKind::Play);
    assert_eq!(h.result_of(play).await, CommandOutcome::Acknowledged);

    let reconnect = h.session.submit(CommandKind::Reconnect);
    assert_eq!(h.result_of(reconnect).await, CommandOutcome::Acknowledged);

    assert_eq!(h.connector.opens(), 2);
    assert_eq!(
        h.states(),
        vec![Connecting, Connected, Reconnecting, Connecting, Connected]
    );
    // Reconnect is handled locally and never written.
    assert_eq!(h.connector.attempted(), vec!["PLAY"]);
    assert_eq!(h.connector.closes(), 1);

    h.session.disconnect().await;
    assert_eq!(h.connector.closes(), 2);
}

#[tokio::test]
async fn pending_reconnect_fails_on_disconnect() {
    let mut h = Harness::new(vec![], Plan::Hang);

    let reconnect = h.session.submit(CommandKind::Reconnect);
    h.session
        .wait_for_state(Connecting, WAIT)
        .await
        .unwrap();
    h.session.disconnect().await;

    assert_eq!(h.result_of(reconnect).await, CommandOutcome::Failed);
}

#[tokio::test]
async fn shutdown_flushes_events() {
    let mut h = Harness::new(vec![], accept());

    let seq = h.session.submit(CommandKind::Next);
    assert_eq!(h.result_of(seq).await, CommandOutcome::Acknowledged);

    let Harness {
        session,
        mut events,
        ..
    } = h;
    session.shutdown().await;

    // The stream ends once the dispatcher has delivered everything.
    let mut rest = Vec::new();
    while let Some(event) = events.recv().await {
        rest.push(event);
    }
    assert_eq!(
        rest,
        vec![SessionEvent::StateChanged {
            state: Disconnected
        }]
    );
}

#[tokio::test]
async fn flapping_endpoint_gives_up_after_cap() {
    let flapping = Plan::Accept(Endpoint {
        hangup: true,
        ..Endpoint::default()
    });
    let mut h = Harness::new(vec![], flapping);

    h.session.reconnect();
    let exhausted = h
        .until(|e| matches!(e, SessionEvent::ReconnectExhausted { .. }))
        .await;
    assert_eq!(exhausted, SessionEvent::ReconnectExhausted { attempts: 5 });

    h.settle().await;
    assert_eq!(h.connector.opens(), 5);
    assert_eq!(h.connector.closes(), 5);
    assert_eq!(h.session.state(), Failed);
    let connected = h.states().iter().filter(|s| **s == Connected).count();
    assert_eq!(connected, 5);
    assert_eq!(h.states().last(), Some(&Failed));

    // Submissions wait for an explicit reconnect.
    h.session.submit(CommandKind::Play);
    h.settle().await;
    assert_eq!(h.connector.opens(), 5);
}

#[tokio::test]
async fn stable_link_clears_attempts() {
    let config = SessionConfig {
        backoff: BackoffConfig {
            reset_after: Duration::from_millis(30),
            ..fast_config().backoff
        },
        ..fast_config()
    };
    let drops_on_write = Plan::Accept(Endpoint {
        hangup_after_write: true,
        ..Endpoint::default()
    });
    let mut plans = vec![Plan::Refuse; 4];
    plans.push(drops_on_write);
    let mut h = Harness::with_config(plans, accept(), config);

    h.session.reconnect();
    h.until(|e| matches!(e, SessionEvent::StateChanged { state: Connected }))
        .await;
    assert_eq!(h.connector.opens(), 5);

    // Up long enough that the fifth open no longer counts against the cap.
    time::sleep(Duration::from_millis(60)).await;
    let play = h.session.submit(CommandKind::Play);
    assert_eq!(h.result_of(play).await, CommandOutcome::Acknowledged);

    time::timeout(WAIT, async {
        while h.connector.opens() < 6 || h.session.state() != Connected {
            time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("never reconnected after the drop");
    h.settle().await;
    h.drain_events();

    assert_eq!(h.connector.opens(), 6);
    assert!(!h
        .seen
        .iter()
        .any(|e| matches!(e, SessionEvent::ReconnectExhausted { .. })));
}

#[tokio::test]
async fn read_failure_during_write_counts_once() {
    let config = SessionConfig {
        write_timeout: Duration::from_secs(30),
        ..fast_config()
    };
    let first = Plan::Accept(Endpoint {
        stall_writes: true,
        hangup_after_write: true,
        ..Endpoint::default()
    });
    let mut h = Harness::with_config(vec![first], Plan::Hang, config);

    let seq = h.session.submit(CommandKind::Play);
    h.until(|e| matches!(e, SessionEvent::StateChanged { state: Reconnecting }))
        .await;
    h.until(|e| matches!(e, SessionEvent::StateChanged { state: Connecting }))
        .await;
    h.settle().await;
    h.drain_events();

    let pending = h.session.pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].seq(), seq);
    assert_eq!(pending[0].failures, 1);
    assert_eq!(pending[0].state, DeliveryState::Failed);

    assert_eq!(
        h.states(),
        vec![Connecting, Connected, Reconnecting, Connecting]
    );
    assert_eq!(h.connector.attempted(), vec!["PLAY"]);
    assert_eq!(h.connector.closes(), 1);
    assert_eq!(h.connector.opens(), 2);
}

#[tokio::test]
async fn simultaneous_read_and_write_failure_counts_once() {
    let first = Plan::Accept(Endpoint {
        fail_writes: vec![0],
        hangup_after_write: true,
        ..Endpoint::default()
    });
    let mut h = Harness::new(vec![first], accept());

    // A second counted failure would resolve PLAY as failed.
    let seq = h.session.submit(CommandKind::Play);
    assert_eq!(h.result_of(seq).await, CommandOutcome::Acknowledged);
    h.settle().await;
    h.drain_events();

    assert_eq!(
        h.states(),
        vec![Connecting, Connected, Reconnecting, Connecting, Connected]
    );
    assert_eq!(h.connector.attempted(), vec!["PLAY", "PLAY"]);
    assert_eq!(h.connector.delivered(), vec!["PLAY"]);
    assert_eq!(h.connector.opens(), 2);
    assert_eq!(h.connector.closes(), 1);
}
