//! Line-oriented TCP transport.
//!
//! Each command is written as `TOKEN\n`; each `\n`-terminated line read from
//! the socket (with an optional `\r` stripped) becomes one output line.
//! A line longer than `MAX_LINE_LEN` ends the connection.

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use rctl_core::error::{RctlError, RctlResult};
use rctl_core::transport::{BoxFuture, LineReader, LineWriter, Transport};

/// Longest line accepted from the peer, excluding the line ending.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Open a TCP connection to `authority` (`host:port`).
pub async fn connect(authority: &str) -> RctlResult<Transport> {
    let stream = TcpStream::connect(authority)
        .await
        .map_err(|e| RctlError::ConnectFailed(format!("{authority}: {e}")))?;
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!("set_nodelay failed: {}", e);
    }

    tracing::info!("TCP connected to {}", authority);

    let (read_half, write_half) = stream.into_split();
    Ok(Transport::new(
        authority,
        Box::new(TcpLineReader::new(read_half)),
        Box::new(TcpLineWriter::new(write_half)),
    ))
}

/// Strip a trailing `\n` or `\r\n`.
fn trim_line_ending(buf: &[u8]) -> &[u8] {
    let buf = buf.strip_suffix(b"\n").unwrap_or(buf);
    buf.strip_suffix(b"\r").unwrap_or(buf)
}

pub struct TcpLineReader {
    inner: BufReader<OwnedReadHalf>,
    buf: Vec<u8>,
}

impl TcpLineReader {
    fn new(read_half: OwnedReadHalf) -> Self {
        Self {
            inner: BufReader::new(read_half),
            buf: Vec::with_capacity(256),
        }
    }
}

impl LineReader for TcpLineReader {
    fn read_line(&mut self) -> BoxFuture<'_, RctlResult<String>> {
        Box::pin(async move {
            self.buf.clear();
            let limit = MAX_LINE_LEN as u64 + 1;
            match (&mut self.inner)
                .take(limit)
                .read_until(b'\n', &mut self.buf)
                .await
            {
                Ok(0) => Err(RctlError::Disconnected("peer closed connection".into())),
                Ok(_) if self.buf.len() > MAX_LINE_LEN && !self.buf.ends_with(b"\n") => {
                    Err(RctlError::Disconnected(format!(
                        "line exceeds {MAX_LINE_LEN} bytes"
                    )))
                }
                Ok(_) => Ok(String::from_utf8_lossy(trim_line_ending(&self.buf)).into_owned()),
                Err(e) => Err(RctlError::Disconnected(format!("TCP read error: {e}"))),
            }
        })
    }
}

pub struct TcpLineWriter {
    inner: Option<OwnedWriteHalf>,
}

impl TcpLineWriter {
    fn new(write_half: OwnedWriteHalf) -> Self {
        Self {
            inner: Some(write_half),
        }
    }
}

impl LineWriter for TcpLineWriter {
    fn write_line<'a>(&'a mut self, line: &'a str) -> BoxFuture<'a, RctlResult<()>> {
        Box::pin(async move {
            let writer = self
                .inner
                .as_mut()
                .ok_or_else(|| RctlError::WriteFailed("connection closed".into()))?;

            let mut frame = Vec::with_capacity(line.len() + 1);
            frame.extend_from_slice(line.as_bytes());
            frame.push(b'\n');

            writer
                .write_all(&frame)
                .await
                .map_err(|e| RctlError::WriteFailed(format!("TCP write error: {e}")))?;
            writer
                .flush()
                .await
                .map_err(|e| RctlError::WriteFailed(format!("TCP flush error: {e}")))
        })
    }

    fn close(&mut self) -> BoxFuture<'_, RctlResult<()>> {
        Box::pin(async move {
            if let Some(mut writer) = self.inner.take() {
                // The peer may already be gone; shutdown errors carry no information.
                let _ = writer.shutdown().await;
            }
            Ok(())
        })
    }
}
