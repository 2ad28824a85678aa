//! WebSocket transport for `StompChat`.
//!
//! Implements [`FrameTransport`] over a `tokio-tungstenite` connection. Each
//! STOMP frame travels as one WebSocket text message. A background reader
//! task decodes incoming messages and hands frames to [`WsTransport::recv`]
//! through a channel; heart-beats and malformed frames are dropped there.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use stompchat_proto::frame::{self, Frame};

use super::{Connector, FrameTransport, TransportError};

/// Type alias for the write half of a WebSocket connection.
type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Type alias for the read half of a WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Capacity of the decoded-frame channel between reader task and `recv`.
const INCOMING_BUFFER: usize = 256;

/// Opens [`WsTransport`]s with `connect_async`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    type Transport = WsTransport;

    async fn open(&self, endpoint: &str) -> Result<WsTransport, TransportError> {
        WsTransport::connect(endpoint).await
    }
}

/// STOMP frames over one WebSocket connection.
pub struct WsTransport {
    /// Write half of the WebSocket connection.
    ws_sender: Mutex<WsSender>,
    /// Frames decoded by the background reader task.
    incoming: Mutex<mpsc::Receiver<Frame>>,
    /// Whether the WebSocket connection is still open.
    open: Arc<AtomicBool>,
    /// Handle to the background reader task.
    reader_handle: tokio::task::JoinHandle<()>,
}

impl WsTransport {
    /// Perform the WebSocket upgrade against `endpoint` and start reading.
    ///
    /// No timeout is applied here; the connection manager bounds the whole
    /// upgrade-plus-handshake sequence.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Unreachable`] if the endpoint refuses the connection.
    /// - [`TransportError::Io`] for TLS, HTTP upgrade, or socket failures.
    pub async fn connect(endpoint: &str) -> Result<Self, TransportError> {
        let (ws_stream, _response) = connect_async(endpoint).await.map_err(|e| {
            tracing::warn!(url = endpoint, err = %e, "broker WebSocket connect failed");
            map_ws_connect_error(endpoint, e)
        })?;

        let (ws_sender, ws_reader) = ws_stream.split();
        let (tx, rx) = mpsc::channel(INCOMING_BUFFER);
        let open = Arc::new(AtomicBool::new(true));
        let reader_handle = tokio::spawn(reader_loop(ws_reader, tx, Arc::clone(&open)));

        tracing::debug!(url = endpoint, "broker WebSocket open");

        Ok(Self {
            ws_sender: Mutex::new(ws_sender),
            incoming: Mutex::new(rx),
            open,
            reader_handle,
        })
    }
}

impl FrameTransport for WsTransport {
    async fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        if !self.open.load(Ordering::Relaxed) {
            return Err(TransportError::ConnectionClosed);
        }

        let mut sender = self.ws_sender.lock().await;
        sender
            .send(Message::Text(frame.encode().into()))
            .await
            .map_err(|e| {
                tracing::warn!(err = %e, command = %frame.command, "WebSocket send failed");
                self.open.store(false, Ordering::Relaxed);
                TransportError::ConnectionClosed
            })
    }

    async fn recv(&self) -> Result<Frame, TransportError> {
        let mut rx = self.incoming.lock().await;
        rx.recv().await.ok_or(TransportError::ConnectionClosed)
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.open.swap(false, Ordering::Relaxed) {
            return Ok(());
        }
        let mut sender = self.ws_sender.lock().await;
        // The peer may already be gone; a failed close frame is not an error.
        let _ = sender.send(Message::Close(None)).await;
        let _ = sender.close().await;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

/// Background task that reads WebSocket messages and decodes STOMP frames.
///
/// Malformed frames are logged and skipped; the connection stays up.
/// Sets `open` to `false` when the WebSocket closes or errors out.
async fn reader_loop(mut ws_reader: WsReader, tx: mpsc::Sender<Frame>, open: Arc<AtomicBool>) {
    while let Some(msg_result) = ws_reader.next().await {
        let text = match msg_result {
            Ok(Message::Text(text)) => text.as_str().to_string(),
            Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                Ok(text) => text.to_string(),
                Err(e) => {
                    tracing::warn!(err = %e, "non-UTF-8 binary frame, skipping");
                    continue;
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("broker WebSocket closed by server");
                break;
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
            Err(e) => {
                tracing::warn!(err = %e, "broker WebSocket read error");
                break;
            }
        };

        match frame::decode(&text) {
            Ok(Some(frame)) => {
                if tx.send(frame).await.is_err() {
                    // Receiver dropped: the transport is gone.
                    break;
                }
            }
            Ok(None) => tracing::trace!("heart-beat"),
            Err(e) => tracing::warn!(err = %e, "malformed STOMP frame, skipping"),
        }
    }
    open.store(false, Ordering::Relaxed);
    tracing::debug!("broker reader task exiting");
}

/// Map a `tokio_tungstenite` connection error to a [`TransportError`].
fn map_ws_connect_error(
    endpoint: &str,
    err: tokio_tungstenite::tungstenite::Error,
) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => {
            if io_err.kind() == std::io::ErrorKind::ConnectionRefused
                || io_err.kind() == std::io::ErrorKind::AddrNotAvailable
            {
                TransportError::Unreachable(endpoint.to_string())
            } else {
                TransportError::Io(io_err)
            }
        }
        WsError::Tls(_) => TransportError::Io(std::io::Error::other(format!("TLS error: {err}"))),
        WsError::Http(response) => TransportError::Io(std::io::Error::other(format!(
            "broker HTTP error: status {}",
            response.status()
        ))),
        other => TransportError::Io(std::io::Error::other(format!(
            "broker connection error: {other}"
        ))),
    }
}
