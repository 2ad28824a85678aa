//! Integration tests for session lifecycle across scope changes.
//!
//! A scope change always tears the old session down and starts with an
//! empty store; stale handles cannot affect the live session.

mod support;

use std::time::Duration;

use stompchat::auth::{AuthContext, Credentials};
use stompchat::connection::ConnectionState;
use stompchat_proto::destination::{RoomId, SessionScope};
use stompchat_proto::frame::Command;

use support::broker::MockBroker;
use support::{contents, message_json, page_json, wait_state, wait_store, ws_manager};

#[tokio::test]
async fn switching_scope_starts_with_an_empty_store() {
    let broker = MockBroker::start().await;
    let manager = ws_manager(&broker.url);

    let lobby = manager.activate(SessionScope::Lobby, AuthContext::Anonymous);
    wait_state(&manager, ConnectionState::Connected).await;
    broker.wait_for_frames(Command::Subscribe, 3).await;
    broker.push(
        "/public/db/",
        &page_json(&[message_json(1, "a", "lobby-1"), message_json(2, "a", "lobby-2")], true),
    );
    wait_store(lobby.store(), |m| m.len() == 2).await;

    assert!(manager.deactivate(&lobby));
    let room = manager.activate(SessionScope::Room(RoomId::new("5")), AuthContext::Anonymous);
    wait_state(&manager, ConnectionState::Connected).await;
    broker.wait_until(|frames| {
        frames.iter().any(|f| {
            f.command == Command::Subscribe && f.get("destination") == Some("/private/chat/5")
        })
    })
    .await;

    assert!(room.store().messages().is_empty());
    assert_ne!(room.generation(), lobby.generation());

    broker.push("/private/chat/5", &message_json(10, "b", "room-1"));
    wait_store(room.store(), |m| m.len() == 1).await;
    assert_eq!(contents(&room.store().messages()), vec!["room-1"]);
    assert!(
        room.store()
            .messages()
            .iter()
            .all(|m| !m.content.starts_with("lobby"))
    );
}

#[tokio::test]
async fn activation_supersedes_previous_session() {
    let broker = MockBroker::start().await;
    let manager = ws_manager(&broker.url);

    let first = manager.activate(SessionScope::Lobby, AuthContext::Anonymous);
    wait_state(&manager, ConnectionState::Connected).await;

    let second = manager.activate(SessionScope::Room(RoomId::new("2")), AuthContext::Anonymous);
    assert!(!first.is_live());
    wait_state(&manager, ConnectionState::Connected).await;

    // The superseded session says goodbye on its own connection.
    broker.wait_for_frames(Command::Disconnect, 1).await;
    assert!(second.is_connected());
    assert_eq!(manager.current().map(|h| h.generation()), Some(second.generation()));
}

#[tokio::test]
async fn stale_deactivate_is_a_no_op() {
    let broker = MockBroker::start().await;
    let manager = ws_manager(&broker.url);

    let first = manager.activate(SessionScope::Lobby, AuthContext::Anonymous);
    let second = manager.activate(SessionScope::Lobby, AuthContext::Anonymous);
    wait_state(&manager, ConnectionState::Connected).await;

    assert!(!manager.deactivate(&first));
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert!(second.is_connected());
}

#[tokio::test]
async fn deactivate_unsubscribes_and_disconnects_with_receipt() {
    let broker = MockBroker::start().await;
    let manager = ws_manager(&broker.url);
    let auth = AuthContext::user("u1", Credentials::new("t", None));

    let session = manager.activate(SessionScope::Lobby, auth);
    wait_state(&manager, ConnectionState::Connected).await;
    broker.wait_for_frames(Command::Subscribe, 4).await;

    assert!(manager.deactivate(&session));
    wait_state(&manager, ConnectionState::Disconnected).await;

    assert_eq!(broker.frames(Command::Unsubscribe).len(), 4);
    let disconnect = broker.frames(Command::Disconnect);
    assert_eq!(disconnect.len(), 1);
    assert!(disconnect[0].get("receipt").is_some());

    // Unsubscribes precede the DISCONNECT.
    let order: Vec<Command> = broker
        .received()
        .iter()
        .map(|f| f.command)
        .filter(|c| matches!(c, Command::Unsubscribe | Command::Disconnect))
        .collect();
    assert_eq!(order.last(), Some(&Command::Disconnect));

    assert!(!manager.deactivate(&session));
}

#[tokio::test]
async fn frames_after_deactivate_are_not_applied() {
    let broker = MockBroker::start().await;
    let manager = ws_manager(&broker.url);

    let session = manager.activate(SessionScope::Lobby, AuthContext::Anonymous);
    wait_state(&manager, ConnectionState::Connected).await;
    broker.wait_for_frames(Command::Subscribe, 3).await;

    manager.deactivate(&session);
    broker.push("/public/chat", &message_json(1, "a", "late"));
    wait_state(&manager, ConnectionState::Disconnected).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(session.store().messages().is_empty());
}

#[tokio::test]
async fn broker_hang_up_reports_disconnected() {
    let broker = MockBroker::start().await;
    let manager = ws_manager(&broker.url);

    let session = manager.activate(SessionScope::Lobby, AuthContext::Anonymous);
    wait_state(&manager, ConnectionState::Connected).await;
    broker.wait_for_frames(Command::Subscribe, 3).await;

    broker.hang_up();
    wait_state(&manager, ConnectionState::Disconnected).await;

    assert!(!session.is_live());
    // A later teardown of the dead session is a no-op.
    assert!(!manager.deactivate(&session));
}
