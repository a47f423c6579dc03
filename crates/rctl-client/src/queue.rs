//! FIFO queue of commands awaiting delivery.
//!
//! Only the head of the queue is ever in flight, so at most one command is
//! `Sent` at a time and delivery order equals submission order. A command
//! whose write fails stays at the head for exactly one retry.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use rctl_core::{Command, CommandKind};

/// Delivery state of a queued command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    /// Waiting to be written.
    Queued,
    /// Handed to the transport, write not yet confirmed.
    Sent,
    /// Written successfully. Acknowledged commands leave the queue.
    Acknowledged,
    /// The last write failed; the command waits at the head for its retry.
    Failed,
}

/// A command plus its delivery bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingCommand {
    pub command: Command,
    /// Token written to the endpoint.
    pub line: &'static str,
    pub state: DeliveryState,
    /// Failed write attempts so far.
    pub failures: u32,
}

impl PendingCommand {
    pub fn seq(&self) -> u64 {
        self.command.seq
    }
}

/// Result of `CommandQueue::mark_failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOutcome {
    /// Kept at the head for one more attempt.
    Requeued,
    /// Second failure; removed from the queue.
    Exhausted(Command),
    /// The sequence number was not in flight.
    NotInFlight,
}

#[derive(Debug)]
struct QueueInner {
    next_seq: u64,
    items: VecDeque<PendingCommand>,
}

/// Thread-safe FIFO command queue.
#[derive(Debug)]
pub struct CommandQueue {
    max_failures: u32,
    inner: Mutex<QueueInner>,
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandQueue {
    /// Failed writes tolerated per command before it is dropped.
    pub const MAX_FAILURES: u32 = 2;

    pub fn new() -> Self {
        Self {
            max_failures: Self::MAX_FAILURES,
            inner: Mutex::new(QueueInner {
                next_seq: 1,
                items: VecDeque::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take the next sequence number without queueing anything.
    ///
    /// Used for session-local commands that share the numbering.
    pub fn reserve_seq(&self) -> u64 {
        let mut inner = self.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        seq
    }

    /// Append a command to the tail and return its sequence number.
    ///
    /// Session-local commands have no wire token and are not queued; they
    /// get `None` and no sequence number is used up.
    pub fn enqueue(&self, kind: CommandKind) -> Option<u64> {
        let line = kind.wire_token()?;
        let mut inner = self.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.items.push_back(PendingCommand {
            command: Command::new(seq, kind),
            line,
            state: DeliveryState::Queued,
            failures: 0,
        });
        Some(seq)
    }

    /// The command at the head of the queue.
    pub fn peek_head(&self) -> Option<PendingCommand> {
        self.lock().items.front().cloned()
    }

    /// Mark the head as in flight. Returns false unless `seq` is the head and
    /// is waiting to be written.
    pub fn mark_sent(&self, seq: u64) -> bool {
        let mut inner = self.lock();
        match inner.items.front_mut() {
            Some(head)
                if head.seq() == seq
                    && matches!(head.state, DeliveryState::Queued | DeliveryState::Failed) =>
            {
                head.state = DeliveryState::Sent;
                true
            }
            _ => false,
        }
    }

    /// Remove the in-flight head after a successful write.
    pub fn mark_acknowledged(&self, seq: u64) -> Option<PendingCommand> {
        let mut inner = self.lock();
        let in_flight = inner
            .items
            .front()
            .is_some_and(|head| head.seq() == seq && head.state == DeliveryState::Sent);
        if !in_flight {
            return None;
        }
        let mut done = inner.items.pop_front()?;
        done.state = DeliveryState::Acknowledged;
        Some(done)
    }

    /// Record a failed write of the in-flight head.
    ///
    /// The first failure keeps the command at the head for a retry; the
    /// second removes it.
    pub fn mark_failed(&self, seq: u64) -> FailOutcome {
        let mut inner = self.lock();
        let Some(head) = inner.items.front_mut() else {
            return FailOutcome::NotInFlight;
        };
        if head.seq() != seq || head.state != DeliveryState::Sent {
            return FailOutcome::NotInFlight;
        }

        head.failures += 1;
        if head.failures < self.max_failures {
            head.state = DeliveryState::Failed;
            return FailOutcome::Requeued;
        }
        let command = head.command;
        inner.items.pop_front();
        FailOutcome::Exhausted(command)
    }

    /// Sequence number of the in-flight command, if any.
    pub fn in_flight(&self) -> Option<u64> {
        self.lock()
            .items
            .front()
            .filter(|head| head.state == DeliveryState::Sent)
            .map(PendingCommand::seq)
    }

    /// Return an in-flight command to `Queued` without counting a failure.
    pub fn cancel_in_flight(&self) -> Option<u64> {
        let mut inner = self.lock();
        let head = inner.items.front_mut()?;
        if head.state != DeliveryState::Sent {
            return None;
        }
        head.state = if head.failures > 0 {
            DeliveryState::Failed
        } else {
            DeliveryState::Queued
        };
        Some(head.seq())
    }

    /// Copy of the queue, head first.
    pub fn snapshot(&self) -> Vec<PendingCommand> {
        self.lock().items.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }
}
