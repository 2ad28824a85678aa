//! Topics a session subscribes to, and how each topic's frames update the
//! store.

use stompchat_proto::destination::{SessionScope, Topic};
use stompchat_proto::message::{self, PayloadError};

use crate::auth::AuthContext;
use crate::store::HistoryWindow;

/// How a topic's frame bodies are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    /// One message, appended in arrival order.
    Incremental,
    /// `{messageList, last}`, replacing the window.
    Snapshot,
    /// Array of member ids, replacing the roster.
    Roster,
}

/// A topic paired with its handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSubscription {
    /// The topic.
    pub topic: Topic,
    /// How its frames are applied.
    pub handler: HandlerKind,
}

impl TopicSubscription {
    const fn new(topic: Topic, handler: HandlerKind) -> Self {
        Self { topic, handler }
    }
}

/// A frame body that did not match its handler's payload shape.
#[derive(Debug, thiserror::Error)]
#[error("{handler:?} frame on {topic}: {source}")]
pub struct DecodeError {
    /// The topic the frame arrived on.
    pub topic: String,
    /// The handler that rejected it.
    pub handler: HandlerKind,
    /// The payload error.
    #[source]
    pub source: PayloadError,
}

/// The fixed topic set for `scope` and `auth`.
#[must_use]
pub fn plan(scope: &SessionScope, auth: &AuthContext) -> Vec<TopicSubscription> {
    use HandlerKind::{Incremental, Roster, Snapshot};

    match (scope, auth.user_id()) {
        (SessionScope::Lobby, None) => vec![
            TopicSubscription::new(Topic::LobbyChat, Incremental),
            TopicSubscription::new(Topic::LobbyRoster, Roster),
            TopicSubscription::new(Topic::LobbyHistory, Snapshot),
        ],
        (SessionScope::Lobby, Some(user)) => vec![
            TopicSubscription::new(Topic::LobbyChat, Incremental),
            TopicSubscription::new(Topic::LobbyRoster, Roster),
            TopicSubscription::new(
                Topic::LobbyDirect {
                    user: user.to_string(),
                },
                Incremental,
            ),
            TopicSubscription::new(
                Topic::LobbyDirectHistory {
                    user: user.to_string(),
                },
                Snapshot,
            ),
        ],
        (SessionScope::Room(room), None) => vec![TopicSubscription::new(
            Topic::RoomChat { room: room.clone() },
            Incremental,
        )],
        (SessionScope::Room(room), Some(user)) => vec![
            TopicSubscription::new(Topic::RoomChat { room: room.clone() }, Incremental),
            TopicSubscription::new(
                Topic::RoomHistory {
                    room: room.clone(),
                    user: user.to_string(),
                },
                Snapshot,
            ),
        ],
    }
}

/// Decode `body` per `subscription`'s handler and apply it to `window`.
///
/// # Errors
///
/// Returns [`DecodeError`] if the body does not match the handler's shape;
/// the window is left untouched.
pub fn apply(
    subscription: &TopicSubscription,
    body: &str,
    window: &mut HistoryWindow,
) -> Result<(), DecodeError> {
    let wrap = |source: PayloadError| DecodeError {
        topic: subscription.topic.path(),
        handler: subscription.handler,
        source,
    };
    match subscription.handler {
        HandlerKind::Incremental => {
            let message = message::decode_message(body).map_err(wrap)?;
            if !window.append_incremental(message) {
                tracing::trace!(topic = %subscription.topic, "duplicate message skipped");
            }
        }
        HandlerKind::Snapshot => {
            let page = message::decode_page(body).map_err(wrap)?;
            let has_more = page.has_more();
            window.replace_snapshot(page.messages, has_more);
        }
        HandlerKind::Roster => {
            let ids = message::decode_roster(body).map_err(wrap)?;
            window.replace_roster(ids);
        }
    }
    Ok(())
}
