//! Bounded log of lines received from the endpoint.
//!
//! Keeps the last N lines so a front-end can render scrollback without the
//! session holding unbounded history. Appends come from the receive loop;
//! snapshots may be taken from any thread at the same time.

use std::collections::VecDeque;
use std::sync::RwLock;

use rctl_core::OutputLine;

/// Default number of lines retained.
pub const DEFAULT_LOG_CAPACITY: usize = 500;

#[derive(Debug)]
struct Lines {
    lines: VecDeque<OutputLine>,
    /// Total lines ever appended (including evicted ones).
    total_appended: u64,
}

/// A fixed-capacity, append-only line log with FIFO eviction.
#[derive(Debug)]
pub struct OutputLog {
    capacity: usize,
    inner: RwLock<Lines>,
}

impl Default for OutputLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl OutputLog {
    /// Create a log that retains at most `capacity` lines.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: RwLock::new(Lines {
                lines: VecDeque::with_capacity(capacity.min(DEFAULT_LOG_CAPACITY)),
                total_appended: 0,
            }),
        }
    }

    /// Append a line, evicting the oldest line if the log is full.
    pub fn append(&self, line: OutputLine) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.total_appended += 1;
        if self.capacity == 0 {
            return;
        }
        if inner.lines.len() == self.capacity {
            inner.lines.pop_front();
        }
        inner.lines.push_back(line);
    }

    /// Copy of the retained lines, oldest first.
    pub fn snapshot(&self) -> Vec<OutputLine> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.lines.iter().cloned().collect()
    }

    /// The most recent `n` lines, oldest first.
    pub fn tail(&self, n: usize) -> Vec<OutputLine> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let skip = inner.lines.len().saturating_sub(n);
        inner.lines.iter().skip(skip).cloned().collect()
    }

    /// Number of lines currently retained.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total lines ever appended, including evicted ones.
    pub fn total_appended(&self) -> u64 {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .total_appended
    }
}
