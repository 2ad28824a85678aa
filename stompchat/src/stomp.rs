//! STOMP 1.2 client session over a [`FrameTransport`].
//!
//! Covers the subset the chat client needs: CONNECT handshake, SUBSCRIBE /
//! UNSUBSCRIBE, SEND, MESSAGE delivery, and DISCONNECT with a receipt.

use std::time::Duration;

use stompchat_proto::destination::{Destination, Topic};
use stompchat_proto::frame::{Command, Frame};

use crate::transport::{FrameTransport, TransportError};

/// Versions offered in the CONNECT frame.
const ACCEPT_VERSION: &str = "1.2,1.1";

/// Heart-beating is disabled in both directions.
const HEART_BEAT: &str = "0,0";

/// A MESSAGE frame routed to one of this client's subscriptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// The `subscription` header, as returned by [`StompClient::subscribe`].
    pub subscription: String,
    /// The topic the broker delivered on.
    pub destination: String,
    /// JSON body.
    pub body: String,
}

/// One connected STOMP session.
pub struct StompClient<T> {
    transport: T,
    next_subscription: u64,
    version: Option<String>,
}

impl<T: FrameTransport> StompClient<T> {
    /// Send CONNECT and wait for CONNECTED.
    ///
    /// `extra_headers` carries credentials; pass none for anonymous sessions.
    /// The caller bounds this with its connect timeout.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Rejected`] if the broker answers with ERROR.
    /// - [`TransportError::Protocol`] if it answers with anything else.
    /// - Any transport error from the underlying connection.
    pub async fn handshake(
        transport: T,
        host: &str,
        extra_headers: &[(String, String)],
    ) -> Result<Self, TransportError> {
        let connect = Frame::new(Command::Connect)
            .header("accept-version", ACCEPT_VERSION)
            .header("host", host)
            .header("heart-beat", HEART_BEAT)
            .headers(extra_headers);
        transport.send(&connect).await?;

        let reply = transport.recv().await?;
        match reply.command {
            Command::Connected => {
                let version = reply.get("version").map(str::to_string);
                tracing::debug!(
                    version = version.as_deref().unwrap_or("1.0"),
                    server = reply.get("server").unwrap_or("unknown"),
                    "STOMP session established"
                );
                Ok(Self {
                    transport,
                    next_subscription: 0,
                    version,
                })
            }
            Command::Error => {
                let _ = transport.close().await;
                Err(TransportError::Rejected(error_text(&reply)))
            }
            other => {
                let _ = transport.close().await;
                Err(TransportError::Protocol(format!(
                    "expected CONNECTED, got {other}"
                )))
            }
        }
    }

    /// Negotiated protocol version, if the broker reported one.
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Subscribe to `topic`; returns the subscription id (`sub-N`).
    ///
    /// # Errors
    ///
    /// Returns a transport error if the SUBSCRIBE frame cannot be sent.
    pub async fn subscribe(&mut self, topic: &Topic) -> Result<String, TransportError> {
        let id = format!("sub-{}", self.next_subscription);
        self.next_subscription += 1;
        let frame = Frame::new(Command::Subscribe)
            .header("id", id.as_str())
            .header("destination", topic.path());
        self.transport.send(&frame).await?;
        tracing::debug!(id = %id, topic = %topic, "subscribed");
        Ok(id)
    }

    /// Drop subscription `id`.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the UNSUBSCRIBE frame cannot be sent.
    pub async fn unsubscribe(&self, id: &str) -> Result<(), TransportError> {
        let frame = Frame::new(Command::Unsubscribe).header("id", id);
        self.transport.send(&frame).await
    }

    /// Publish a JSON `body` to `destination`.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the SEND frame cannot be sent.
    pub async fn publish(
        &self,
        destination: &Destination,
        body: String,
        extra_headers: &[(String, String)],
    ) -> Result<(), TransportError> {
        let frame = Frame::new(Command::Send)
            .header("destination", destination.path())
            .header("content-type", "application/json")
            .headers(extra_headers)
            .body(body);
        self.transport.send(&frame).await
    }

    /// Wait for the next MESSAGE frame.
    ///
    /// Cancel-safe. Frames other than MESSAGE and ERROR are logged and
    /// skipped.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Rejected`] when the broker sends ERROR.
    /// - [`TransportError::ConnectionClosed`] when the connection drops.
    pub async fn next_delivery(&self) -> Result<Delivery, TransportError> {
        loop {
            let frame = self.transport.recv().await?;
            match frame.command {
                Command::Message => {
                    let Some(subscription) = frame.get("subscription") else {
                        tracing::warn!("MESSAGE without subscription header, dropping");
                        continue;
                    };
                    return Ok(Delivery {
                        subscription: subscription.to_string(),
                        destination: frame.get("destination").unwrap_or_default().to_string(),
                        body: frame.body,
                    });
                }
                Command::Error => {
                    let text = error_text(&frame);
                    tracing::warn!(error = %text, "broker sent ERROR");
                    return Err(TransportError::Rejected(text));
                }
                other => tracing::debug!(command = %other, "ignoring unexpected frame"),
            }
        }
    }

    /// Send DISCONNECT, wait up to `receipt_timeout` for its RECEIPT, then
    /// close the transport. Never fails: a missing receipt is logged.
    pub async fn disconnect(self, receipt_timeout: Duration) {
        let receipt_id = uuid::Uuid::now_v7().to_string();
        let frame = Frame::new(Command::Disconnect).header("receipt", receipt_id.as_str());

        match self.transport.send(&frame).await {
            Ok(()) => {
                let wait = async {
                    loop {
                        match self.transport.recv().await {
                            Ok(f)
                                if f.command == Command::Receipt
                                    && f.get("receipt-id") == Some(receipt_id.as_str()) =>
                            {
                                return true;
                            }
                            Ok(_) => {}
                            Err(_) => return false,
                        }
                    }
                };
                match tokio::time::timeout(receipt_timeout, wait).await {
                    Ok(true) => tracing::debug!("DISCONNECT acknowledged"),
                    Ok(false) => tracing::debug!("connection closed before DISCONNECT receipt"),
                    Err(_) => tracing::debug!("no DISCONNECT receipt before timeout"),
                }
            }
            Err(e) => tracing::debug!(error = %e, "DISCONNECT not sent"),
        }

        if let Err(e) = self.transport.close().await {
            tracing::debug!(error = %e, "transport close failed");
        }
    }
}

/// Human-readable text of an ERROR frame.
fn error_text(frame: &Frame) -> String {
    match frame.get("message") {
        Some(message) => message.to_string(),
        None if !frame.body.is_empty() => frame.body.clone(),
        None => "unspecified broker error".to_string(),
    }
}
