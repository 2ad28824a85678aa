//! Mock history REST backend on axum.
//!
//! Replies are queued by the test and served in order; each request's path
//! and `Authorization` header are recorded.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use parking_lot::Mutex;

/// One queued response.
#[derive(Clone)]
pub struct Reply {
    /// HTTP status.
    pub status: u16,
    /// Response body.
    pub body: String,
    /// Delay before answering.
    pub delay: Duration,
}

impl Reply {
    /// 200 with `body`.
    pub fn ok(body: String) -> Self {
        Self {
            status: 200,
            body,
            delay: Duration::ZERO,
        }
    }

    /// Bare status with an empty body.
    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
            delay: Duration::ZERO,
        }
    }

    /// Same reply, answered after `delay`.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// A request the backend saw.
#[derive(Debug, Clone)]
pub struct Recorded {
    /// Request path.
    pub path: String,
    /// `Authorization` header, if sent.
    pub authorization: Option<String>,
}

#[derive(Default)]
struct HistoryState {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<Recorded>>,
}

/// Handle to a running mock backend.
pub struct MockHistory {
    /// `http://` base URL.
    pub base_url: String,
    state: Arc<HistoryState>,
    _server: tokio::task::JoinHandle<()>,
}

impl MockHistory {
    /// Start a backend on `127.0.0.1:0`.
    pub async fn start() -> Self {
        let state = Arc::new(HistoryState::default());
        let app = axum::Router::new()
            .fallback(handle)
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
            _server: server,
        }
    }

    /// Queue the next response.
    pub fn enqueue(&self, reply: Reply) {
        self.state.replies.lock().push_back(reply);
    }

    /// Requests seen so far.
    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().clone()
    }
}

async fn handle(
    State(state): State<Arc<HistoryState>>,
    uri: Uri,
    headers: HeaderMap,
) -> (StatusCode, String) {
    state.requests.lock().push(Recorded {
        path: uri.path().to_string(),
        authorization: headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    });

    let reply = state.replies.lock().pop_front();
    let Some(reply) = reply else {
        return (StatusCode::NOT_FOUND, String::new());
    };
    if !reply.delay.is_zero() {
        tokio::time::sleep(reply.delay).await;
    }
    (
        StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        reply.body,
    )
}
