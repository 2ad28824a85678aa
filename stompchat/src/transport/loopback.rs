//! Loopback transport for testing.
//!
//! Uses in-process [`tokio::sync::mpsc`] channels to stand in for a broker
//! connection. Every [`LoopbackConnector::open`] creates a channel pair and
//! hands the broker end, a [`LoopbackPeer`], to whoever holds the receiver
//! returned by [`LoopbackConnector::new`].

use tokio::sync::{Mutex, mpsc};

use stompchat_proto::frame::Frame;

use super::{Connector, FrameTransport, TransportError};

/// Channel capacity in each direction.
const BUFFER: usize = 64;

/// Opens [`LoopbackTransport`]s and publishes the broker end of each.
#[derive(Debug, Clone)]
pub struct LoopbackConnector {
    peers: mpsc::UnboundedSender<LoopbackPeer>,
}

impl LoopbackConnector {
    /// Create a connector and the stream of broker ends it will produce.
    ///
    /// Dropping the receiver makes every later `open` fail with
    /// [`TransportError::Unreachable`].
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LoopbackPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        (Self { peers }, rx)
    }
}

impl Connector for LoopbackConnector {
    type Transport = LoopbackTransport;

    async fn open(&self, endpoint: &str) -> Result<LoopbackTransport, TransportError> {
        let (to_broker, from_client) = mpsc::channel(BUFFER);
        let (to_client, from_broker) = mpsc::channel(BUFFER);

        let peer = LoopbackPeer {
            endpoint: endpoint.to_string(),
            tx: Some(to_client),
            rx: from_client,
        };
        self.peers
            .send(peer)
            .map_err(|_| TransportError::Unreachable(endpoint.to_string()))?;

        Ok(LoopbackTransport {
            tx: parking_lot::Mutex::new(Some(to_broker)),
            rx: Mutex::new(from_broker),
        })
    }
}

/// Client end of a loopback connection.
pub struct LoopbackTransport {
    /// Sender toward the broker end; `None` once closed.
    tx: parking_lot::Mutex<Option<mpsc::Sender<Frame>>>,
    /// Frames pushed by the broker end.
    rx: Mutex<mpsc::Receiver<Frame>>,
}

impl FrameTransport for LoopbackTransport {
    async fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        let tx = self
            .tx
            .lock()
            .clone()
            .ok_or(TransportError::ConnectionClosed)?;
        tx.send(frame.clone())
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn recv(&self) -> Result<Frame, TransportError> {
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(TransportError::ConnectionClosed)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.tx.lock().take();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.tx.lock().as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

/// Broker end of a loopback connection, driven by the test.
pub struct LoopbackPeer {
    endpoint: String,
    tx: Option<mpsc::Sender<Frame>>,
    rx: mpsc::Receiver<Frame>,
}

impl LoopbackPeer {
    /// The endpoint the client asked for.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Deliver a frame to the client. Returns `false` if the client is gone.
    pub async fn send(&self, frame: Frame) -> bool {
        match &self.tx {
            Some(tx) => tx.send(frame).await.is_ok(),
            None => false,
        }
    }

    /// Next frame from the client, or `None` once it closed.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Simulate the broker dropping the connection.
    pub fn hang_up(&mut self) {
        self.tx.take();
    }
}
