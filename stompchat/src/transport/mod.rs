//! Frame transport abstraction for `StompChat`.
//!
//! Defines the [`FrameTransport`] trait that carries whole STOMP frames, and
//! the [`Connector`] trait that opens one. Concrete implementations:
//! - [`ws::WsConnector`]: STOMP over a WebSocket (one frame per text message)
//! - [`loopback::LoopbackConnector`]: in-process channel pair for testing

pub mod loopback;
pub mod ws;

use stompchat_proto::frame::Frame;

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection to the broker has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The operation timed out before completing.
    #[error("transport operation timed out")]
    Timeout,

    /// The broker endpoint could not be reached.
    #[error("broker at {0} is unreachable")]
    Unreachable(String),

    /// The broker refused the session or reported an ERROR frame.
    #[error("broker rejected the session: {0}")]
    Rejected(String),

    /// The broker sent something the STOMP client cannot act on.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An underlying I/O error occurred.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Async transport that carries STOMP frames to and from one broker.
///
/// `send` and `recv` may run concurrently from different tasks. Heart-beats
/// and undecodable messages never surface from `recv`.
///
/// # Cancellation
///
/// `recv` must be cancel-safe: dropping its future before completion must
/// not lose a frame. The session driver polls it inside `tokio::select!`.
pub trait FrameTransport: Send + Sync + 'static {
    /// Send one frame.
    fn send(
        &self,
        frame: &Frame,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    /// Receive the next frame from the broker.
    ///
    /// Returns [`TransportError::ConnectionClosed`] once the connection is
    /// gone.
    fn recv(&self) -> impl std::future::Future<Output = Result<Frame, TransportError>> + Send;

    /// Close the connection. Idempotent.
    fn close(&self) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    /// Whether the underlying connection is still open.
    fn is_open(&self) -> bool;
}

/// Opens [`FrameTransport`]s to a broker endpoint.
pub trait Connector: Send + Sync + 'static {
    /// The transport this connector produces.
    type Transport: FrameTransport;

    /// Open a fresh connection to `endpoint`.
    fn open(
        &self,
        endpoint: &str,
    ) -> impl std::future::Future<Output = Result<Self::Transport, TransportError>> + Send;
}
