//! Abstract line transport for rctl.
//!
//! A `Transport` is one open connection to one endpoint. It is split into a
//! reader half (driven by the session's receive loop) and a writer half
//! (driven by the drain loop). A `Connector` opens fresh transports; the
//! session never reuses a transport after it fails.

use std::future::Future;
use std::pin::Pin;

use crate::error::{RctlError, RctlResult};

/// A boxed, sendable future. Keeps the transport traits object-safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Receiving half of a line transport.
pub trait LineReader: Send {
    /// Read the next line, without its terminator.
    ///
    /// Fails with `Disconnected` when the peer closes or the socket errors.
    fn read_line(&mut self) -> BoxFuture<'_, RctlResult<String>>;
}

/// Sending half of a line transport.
pub trait LineWriter: Send {
    /// Write `line` followed by a newline and flush.
    ///
    /// Fails with `WriteFailed` if the connection is broken.
    fn write_line<'a>(&'a mut self, line: &'a str) -> BoxFuture<'a, RctlResult<()>>;

    /// Close the connection. Must be idempotent.
    fn close(&mut self) -> BoxFuture<'_, RctlResult<()>>;
}

/// Opens transports to an address.
pub trait Connector: Send + Sync + 'static {
    /// Open a new connection. Fails with `ConnectFailed` or `InvalidAddress`.
    fn open<'a>(&'a self, address: &'a str) -> BoxFuture<'a, RctlResult<Transport>>;
}

/// A single open connection to one endpoint.
pub struct Transport {
    peer: String,
    reader: Box<dyn LineReader>,
    writer: Box<dyn LineWriter>,
    closed: bool,
}

impl Transport {
    pub fn new(
        peer: impl Into<String>,
        reader: Box<dyn LineReader>,
        writer: Box<dyn LineWriter>,
    ) -> Self {
        Self {
            peer: peer.into(),
            reader,
            writer,
            closed: false,
        }
    }

    /// The address this transport is connected to.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub async fn read_line(&mut self) -> RctlResult<String> {
        if self.closed {
            return Err(RctlError::Disconnected("transport closed".into()));
        }
        self.reader.read_line().await
    }

    pub async fn write_line(&mut self, line: &str) -> RctlResult<()> {
        if self.closed {
            return Err(RctlError::WriteFailed("transport closed".into()));
        }
        self.writer.write_line(line).await
    }

    /// Close the connection. Calling this more than once is a no-op.
    pub async fn close(&mut self) -> RctlResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.writer.close().await
    }

    /// Split into independently owned halves.
    pub fn into_split(self) -> (Box<dyn LineReader>, Box<dyn LineWriter>) {
        (self.reader, self.writer)
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("peer", &self.peer)
            .field("closed", &self.closed)
            .finish()
    }
}
