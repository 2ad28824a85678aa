//! Minimal STOMP broker over axum WebSockets.
//!
//! Answers CONNECT with CONNECTED (or ERROR when configured to reject),
//! tracks subscriptions per connection, acknowledges receipts, and records
//! every frame it receives. Tests push MESSAGE frames to subscribed topics.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use stompchat_proto::frame::{self, Command, Frame};

use super::WAIT;

enum Control {
    Push { topic: String, body: String },
    Raw(String),
    HangUp,
}

#[derive(Default)]
struct BrokerState {
    received: Mutex<Vec<Frame>>,
    connections: Mutex<Vec<mpsc::UnboundedSender<Control>>>,
    reject: Mutex<Option<String>>,
}

/// Handle to a running mock broker.
pub struct MockBroker {
    /// `ws://` URL of the broker endpoint.
    pub url: String,
    state: Arc<BrokerState>,
    _server: tokio::task::JoinHandle<()>,
}

impl MockBroker {
    /// Start a broker on `127.0.0.1:0`.
    pub async fn start() -> Self {
        let state = Arc::new(BrokerState::default());
        let app = axum::Router::new()
            .route("/ws", axum::routing::get(ws_handler))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            url: format!("ws://{addr}/ws"),
            state,
            _server: server,
        }
    }

    /// Answer future CONNECT frames with ERROR carrying `message`.
    pub fn reject_connects(&self, message: &str) {
        *self.state.reject.lock() = Some(message.to_string());
    }

    /// Every frame received so far, across connections.
    pub fn received(&self) -> Vec<Frame> {
        self.state.received.lock().clone()
    }

    /// Received frames with `command`.
    pub fn frames(&self, command: Command) -> Vec<Frame> {
        self.received()
            .into_iter()
            .filter(|f| f.command == command)
            .collect()
    }

    /// `destination` headers of SUBSCRIBE frames, in arrival order.
    pub fn subscribed_topics(&self) -> Vec<String> {
        self.frames(Command::Subscribe)
            .iter()
            .filter_map(|f| f.get("destination").map(str::to_string))
            .collect()
    }

    /// Poll until `pred` holds for the received frames.
    pub async fn wait_until(&self, pred: impl Fn(&[Frame]) -> bool) {
        tokio::time::timeout(WAIT, async {
            loop {
                if pred(&self.state.received.lock()) {
                    return;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("timed out waiting for broker frames");
    }

    /// Wait until `count` frames with `command` have arrived.
    pub async fn wait_for_frames(&self, command: Command, count: usize) {
        self.wait_until(|frames| frames.iter().filter(|f| f.command == command).count() >= count)
            .await;
    }

    /// Deliver `body` to every connection subscribed to `topic`.
    pub fn push(&self, topic: &str, body: &str) {
        self.broadcast(|| Control::Push {
            topic: topic.to_string(),
            body: body.to_string(),
        });
    }

    /// Send `text` verbatim as one WebSocket text message.
    pub fn push_raw(&self, text: &str) {
        self.broadcast(|| Control::Raw(text.to_string()));
    }

    /// Close every open connection from the broker side.
    pub fn hang_up(&self) {
        self.broadcast(|| Control::HangUp);
    }

    fn broadcast(&self, make: impl Fn() -> Control) {
        self.state
            .connections
            .lock()
            .retain(|tx| tx.send(make()).is_ok());
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<BrokerState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<BrokerState>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut control) = mpsc::unbounded_channel();
    state.connections.lock().push(tx);

    // destination -> subscription id
    let mut subscriptions: HashMap<String, String> = HashMap::new();

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text.as_str().to_string(),
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };
                let Ok(Some(frame)) = frame::decode(&text) else {
                    continue;
                };
                state.received.lock().push(frame.clone());

                let reply = match frame.command {
                    Command::Connect => {
                        let reject = state.reject.lock().clone();
                        Some(match reject {
                            Some(message) => Frame::new(Command::Error).header("message", message),
                            None => Frame::new(Command::Connected)
                                .header("version", "1.2")
                                .header("heart-beat", "0,0"),
                        })
                    }
                    Command::Subscribe => {
                        if let (Some(id), Some(dest)) = (frame.get("id"), frame.get("destination")) {
                            subscriptions.insert(dest.to_string(), id.to_string());
                        }
                        None
                    }
                    Command::Unsubscribe => {
                        if let Some(id) = frame.get("id") {
                            subscriptions.retain(|_, sub| sub != id);
                        }
                        None
                    }
                    Command::Disconnect => frame
                        .get("receipt")
                        .map(|receipt| Frame::new(Command::Receipt).header("receipt-id", receipt)),
                    _ => None,
                };
                if let Some(reply) = reply {
                    if sender.send(Message::Text(reply.encode().into())).await.is_err() {
                        break;
                    }
                }
            }
            command = control.recv() => {
                let text = match command {
                    Some(Control::Push { topic, body }) => {
                        let Some(id) = subscriptions.get(&topic) else {
                            continue;
                        };
                        Frame::new(Command::Message)
                            .header("subscription", id.as_str())
                            .header("destination", topic)
                            .header("message-id", "m")
                            .header("content-type", "application/json")
                            .body(body)
                            .encode()
                    }
                    Some(Control::Raw(text)) => text,
                    Some(Control::HangUp) | None => {
                        let _ = sender.close().await;
                        break;
                    }
                };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    }
}
