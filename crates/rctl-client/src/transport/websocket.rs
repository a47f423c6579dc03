//! WebSocket transport for rctl.
//!
//! Commands are sent as one text message each. Incoming text (or binary)
//! messages are split on line breaks; every line becomes one output line.

use std::collections::VecDeque;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use rctl_core::error::{RctlError, RctlResult};
use rctl_core::transport::{BoxFuture, LineReader, LineWriter, Transport};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connect to an endpoint over WebSocket.
pub async fn connect(url: &str) -> RctlResult<Transport> {
    let (ws_stream, _response) = connect_async(url)
        .await
        .map_err(|e| RctlError::ConnectFailed(format!("WebSocket connect error: {e}")))?;

    tracing::info!("WebSocket connected to {}", url);

    let (sink, stream) = ws_stream.split();
    Ok(Transport::new(
        url,
        Box::new(WsLineReader {
            stream,
            pending: VecDeque::new(),
        }),
        Box::new(WsLineWriter {
            sink,
            closed: false,
        }),
    ))
}

pub struct WsLineReader {
    stream: SplitStream<WsStream>,
    pending: VecDeque<String>,
}

impl WsLineReader {
    fn push_text(&mut self, text: &str) {
        self.pending.extend(text.lines().map(str::to_string));
    }
}

impl LineReader for WsLineReader {
    fn read_line(&mut self) -> BoxFuture<'_, RctlResult<String>> {
        Box::pin(async move {
            loop {
                if let Some(line) = self.pending.pop_front() {
                    return Ok(line);
                }

                match self.stream.next().await {
                    Some(Ok(Message::Text(text))) => self.push_text(&text),
                    Some(Ok(Message::Binary(data))) => {
                        self.push_text(&String::from_utf8_lossy(&data))
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!("WebSocket closed by peer");
                        return Err(RctlError::Disconnected("WebSocket closed by peer".into()));
                    }
                    // Pings are answered by tungstenite; pongs and raw frames carry no lines.
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        return Err(RctlError::Disconnected(format!("WebSocket read error: {e}")))
                    }
                }
            }
        })
    }
}

pub struct WsLineWriter {
    sink: SplitSink<WsStream, Message>,
    closed: bool,
}

impl LineWriter for WsLineWriter {
    fn write_line<'a>(&'a mut self, line: &'a str) -> BoxFuture<'a, RctlResult<()>> {
        Box::pin(async move {
            if self.closed {
                return Err(RctlError::WriteFailed("WebSocket closed".into()));
            }
            self.sink
                .send(Message::Text(line.to_string()))
                .await
                .map_err(|e| RctlError::WriteFailed(format!("WebSocket write error: {e}")))
        })
    }

    fn close(&mut self) -> BoxFuture<'_, RctlResult<()>> {
        Box::pin(async move {
            if !self.closed {
                self.closed = true;
                let _ = self.sink.send(Message::Close(None)).await;
                let _ = self.sink.close().await;
            }
            Ok(())
        })
    }
}
