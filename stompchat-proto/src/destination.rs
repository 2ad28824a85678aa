//! Session scopes and the broker paths derived from them.
//!
//! [`Topic`]s are subscribed to; [`Destination`]s are published to. Both
//! render to the exact path strings the broker routes on.

use std::fmt;

/// Identifier of a chat room.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomId(String);

impl RoomId {
    /// Creates a room identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a session is bound to: the global lobby or one room.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SessionScope {
    /// The global, roomless lobby.
    Lobby,
    /// A single room.
    Room(RoomId),
}

impl fmt::Display for SessionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lobby => f.write_str("lobby"),
            Self::Room(room) => write!(f, "room:{room}"),
        }
    }
}

/// A subscribable broker topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Lobby broadcast feed.
    LobbyChat,
    /// Lobby presence roster.
    LobbyRoster,
    /// Lobby history snapshot for anonymous viewers.
    LobbyHistory,
    /// Direct messages addressed to `user`.
    LobbyDirect {
        /// The subscribing member.
        user: String,
    },
    /// History snapshot including `user`'s direct messages.
    LobbyDirectHistory {
        /// The subscribing member.
        user: String,
    },
    /// Room broadcast feed.
    RoomChat {
        /// The room.
        room: RoomId,
    },
    /// Room history snapshot for `user`.
    RoomHistory {
        /// The room.
        room: RoomId,
        /// The subscribing member.
        user: String,
    },
}

impl Topic {
    /// The broker path for this topic.
    #[must_use]
    pub fn path(&self) -> String {
        match self {
            Self::LobbyChat => "/public/chat".to_string(),
            Self::LobbyRoster => "/public/users".to_string(),
            Self::LobbyHistory => "/public/db/".to_string(),
            Self::LobbyDirect { user } => format!("/public/dm/{user}"),
            Self::LobbyDirectHistory { user } => format!("/public/db/{user}"),
            Self::RoomChat { room } => format!("/private/chat/{room}"),
            Self::RoomHistory { room, user } => format!("/private/db/{room}/{user}"),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// A publish destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    /// Lobby broadcast.
    LobbyChat,
    /// Room broadcast.
    RoomChat {
        /// The room.
        room: RoomId,
    },
    /// Direct message to one member.
    Direct {
        /// The recipient's member id.
        recipient: String,
    },
}

impl Destination {
    /// Broadcast destination for `scope`.
    #[must_use]
    pub fn broadcast(scope: &SessionScope) -> Self {
        match scope {
            SessionScope::Lobby => Self::LobbyChat,
            SessionScope::Room(room) => Self::RoomChat { room: room.clone() },
        }
    }

    /// The broker path for this destination.
    #[must_use]
    pub fn path(&self) -> String {
        match self {
            Self::LobbyChat => "/app/chat".to_string(),
            Self::RoomChat { room } => format!("/app/room/{room}"),
            Self::Direct { recipient } => format!("/app/dm/{recipient}"),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}
