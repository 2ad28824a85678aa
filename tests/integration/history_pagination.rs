//! Integration tests for loading older history over HTTP.

mod support;

use std::sync::Arc;
use std::time::Duration;

use stompchat::auth::{AuthContext, Credentials};
use stompchat::connection::{ConnectionManager, ConnectionState, SessionHandle};
use stompchat::pagination::{
    FetchOutcome, HttpHistoryBackend, PaginationError, PaginationFetcher, SkipReason,
};
use stompchat::transport::ws::WsConnector;
use stompchat_proto::destination::{RoomId, SessionScope};
use stompchat_proto::frame::Command;

use support::broker::MockBroker;
use support::history::{MockHistory, Reply};
use support::{WAIT, contents, message_json, page_json, wait_state, wait_store, ws_manager};

struct Fixture {
    broker: MockBroker,
    history: MockHistory,
    manager: ConnectionManager<WsConnector>,
    fetcher: Arc<PaginationFetcher<HttpHistoryBackend>>,
}

impl Fixture {
    async fn start() -> Self {
        let broker = MockBroker::start().await;
        let history = MockHistory::start().await;
        let manager = ws_manager(&broker.url);
        let backend = HttpHistoryBackend::new(history.base_url.clone(), Duration::from_secs(5)).unwrap();
        Self {
            broker,
            history,
            manager,
            fetcher: Arc::new(PaginationFetcher::new(backend)),
        }
    }

    /// Activate the anonymous lobby and deliver the snapshot `[m1, m2]`.
    async fn lobby_with_snapshot(&self, last: bool) -> SessionHandle {
        let session = self
            .manager
            .activate(SessionScope::Lobby, AuthContext::Anonymous);
        wait_state(&self.manager, ConnectionState::Connected).await;
        self.broker.wait_for_frames(Command::Subscribe, 3).await;
        self.broker.push(
            "/public/db/",
            &page_json(&[message_json(1, "a", "m1"), message_json(2, "b", "m2")], last),
        );
        wait_store(session.store(), |m| m.len() == 2).await;
        session
    }
}

#[tokio::test]
async fn older_page_is_prepended_and_has_more_follows_server() {
    let fx = Fixture::start().await;
    let session = fx.lobby_with_snapshot(false).await;

    fx.history
        .enqueue(Reply::ok(page_json(&[message_json(0, "z", "m0")], true)));
    let outcome = fx.fetcher.fetch_older(&session).await.unwrap();

    assert_eq!(
        outcome,
        FetchOutcome::Applied {
            added: 1,
            has_more: false
        }
    );
    assert_eq!(contents(&session.store().messages()), vec!["m0", "m1", "m2"]);
    assert!(!session.store().has_more());

    let requests = fx.history.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].path, "/message/more/1");
    assert!(requests[0].authorization.is_none());
}

#[tokio::test]
async fn overlapping_page_adds_no_duplicates() {
    let fx = Fixture::start().await;
    let session = fx.lobby_with_snapshot(false).await;

    fx.history.enqueue(Reply::ok(page_json(
        &[message_json(0, "z", "m0"), message_json(1, "a", "m1")],
        false,
    )));
    let outcome = fx.fetcher.fetch_older(&session).await.unwrap();

    assert_eq!(
        outcome,
        FetchOutcome::Applied {
            added: 1,
            has_more: true
        }
    );
    assert_eq!(contents(&session.store().messages()), vec!["m0", "m1", "m2"]);
}

#[tokio::test]
async fn second_fetch_while_pending_is_skipped() {
    let fx = Fixture::start().await;
    let session = fx.lobby_with_snapshot(false).await;

    fx.history.enqueue(
        Reply::ok(page_json(&[message_json(0, "z", "m0")], false))
            .delayed(Duration::from_millis(300)),
    );

    let fetcher = Arc::clone(&fx.fetcher);
    let pending_session = session.clone();
    let first = tokio::spawn(async move { fetcher.fetch_older(&pending_session).await });

    tokio::time::timeout(WAIT, async {
        while fx.history.requests().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let second = fx.fetcher.fetch_older(&session).await.unwrap();
    assert_eq!(second, FetchOutcome::Skipped(SkipReason::AlreadyInFlight));
    assert!(session.store().has_more());

    let first = first.await.unwrap().unwrap();
    assert!(matches!(first, FetchOutcome::Applied { added: 1, .. }));
    assert_eq!(fx.history.requests().len(), 1);
}

#[tokio::test]
async fn failed_fetch_leaves_store_unchanged() {
    let fx = Fixture::start().await;
    let session = fx.lobby_with_snapshot(false).await;

    fx.history.enqueue(Reply::status(500));
    let result = fx.fetcher.fetch_older(&session).await;
    assert!(matches!(result, Err(PaginationError::Status(500))));
    assert!(session.store().has_more());
    assert_eq!(contents(&session.store().messages()), vec!["m1", "m2"]);

    // Nothing is retried automatically, and the slot is free again.
    assert_eq!(fx.history.requests().len(), 1);
    fx.history
        .enqueue(Reply::ok(page_json(&[message_json(0, "z", "m0")], true)));
    assert!(matches!(
        fx.fetcher.fetch_older(&session).await.unwrap(),
        FetchOutcome::Applied { .. }
    ));
}

#[tokio::test]
async fn malformed_page_is_a_decode_error() {
    let fx = Fixture::start().await;
    let session = fx.lobby_with_snapshot(false).await;

    fx.history.enqueue(Reply::ok("<html>".to_string()));
    let result = fx.fetcher.fetch_older(&session).await;
    assert!(matches!(result, Err(PaginationError::Decode(_))));
    assert!(session.store().has_more());
}

#[tokio::test]
async fn no_more_history_makes_no_request() {
    let fx = Fixture::start().await;
    let session = fx.lobby_with_snapshot(true).await;

    let outcome = fx.fetcher.fetch_older(&session).await.unwrap();
    assert_eq!(outcome, FetchOutcome::Skipped(SkipReason::NoMoreHistory));
    assert!(fx.history.requests().is_empty());
}

#[tokio::test]
async fn snapshot_during_fetch_discards_the_page() {
    let fx = Fixture::start().await;
    let session = fx.lobby_with_snapshot(false).await;

    fx.history.enqueue(
        Reply::ok(page_json(&[message_json(0, "z", "m0")], false))
            .delayed(Duration::from_millis(300)),
    );
    let fetcher = Arc::clone(&fx.fetcher);
    let pending_session = session.clone();
    let pending = tokio::spawn(async move { fetcher.fetch_older(&pending_session).await });

    tokio::time::timeout(WAIT, async {
        while fx.history.requests().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    fx.broker.push(
        "/public/db/",
        &page_json(&[message_json(5, "a", "fresh")], true),
    );
    wait_store(session.store(), |m| m.len() == 1).await;

    assert_eq!(pending.await.unwrap().unwrap(), FetchOutcome::Discarded);
    assert_eq!(contents(&session.store().messages()), vec!["fresh"]);
}

#[tokio::test]
async fn authenticated_room_fetch_sends_authorization() {
    let fx = Fixture::start().await;
    let auth = AuthContext::user("u1", Credentials::new("access-1", None));
    let session = fx
        .manager
        .activate(SessionScope::Room(RoomId::new("7")), auth);
    wait_state(&fx.manager, ConnectionState::Connected).await;
    fx.broker.wait_for_frames(Command::Subscribe, 2).await;

    fx.broker.push(
        "/private/db/7/u1",
        &page_json(&[message_json(40, "a", "r40")], false),
    );
    wait_store(session.store(), |m| m.len() == 1).await;

    fx.history
        .enqueue(Reply::ok(page_json(&[message_json(39, "b", "r39")], false)));
    fx.fetcher.fetch_older(&session).await.unwrap();

    let requests = fx.history.requests();
    assert_eq!(requests[0].path, "/room/7/message/more/40");
    assert_eq!(requests[0].authorization.as_deref(), Some("access-1"));
    assert_eq!(contents(&session.store().messages()), vec!["r39", "r40"]);
}

#[tokio::test]
async fn inactive_session_is_skipped() {
    let fx = Fixture::start().await;
    let session = fx.lobby_with_snapshot(false).await;
    fx.manager.deactivate(&session);

    assert_eq!(
        fx.fetcher.fetch_older(&session).await.unwrap(),
        FetchOutcome::Skipped(SkipReason::Inactive)
    );
    assert!(fx.history.requests().is_empty());
}
