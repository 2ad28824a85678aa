//! JSON payloads carried in STOMP frame bodies.
//!
//! Field names follow the broker's camelCase JSON. The room broker names
//! the sender fields `senderUsersId` / `senderUsersType`; both spellings
//! are accepted on decode.

use serde::{Deserialize, Serialize};

/// Error type for payload encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    /// The body is not valid JSON for the expected payload shape.
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Whether a message was broadcast to a channel or sent to one user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Broadcast chat message.
    #[default]
    #[serde(rename = "chat")]
    Chat,
    /// Direct (whisper) message.
    #[serde(rename = "dm", alias = "direct")]
    Direct,
}

/// A chat message as delivered by the broker or the history backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Server-assigned sequence number. Present on persisted history
    /// entries; live frames may omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no: Option<i64>,
    /// Broadcast or direct.
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    /// Sender's member id.
    #[serde(rename = "senderMemberId", alias = "senderUsersId")]
    pub sender_id: String,
    /// Sender's role or level, display only.
    #[serde(
        rename = "senderMemberLevel",
        alias = "senderUsersType",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sender_label: Option<String>,
    /// Recipient's member id, direct messages only.
    #[serde(
        rename = "receiverMemberId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub recipient_id: Option<String>,
    /// Message text.
    pub content: String,
    /// Server timestamp text. Informational: never used for ordering.
    #[serde(rename = "time", default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Stable identity of a delivered message, used for de-duplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKey {
    /// The server sequence number.
    Numbered(i64),
    /// Fallback identity for frames without a sequence number.
    Derived {
        /// Broadcast or direct.
        kind: MessageKind,
        /// Sender id.
        sender: String,
        /// Recipient id, if any.
        recipient: Option<String>,
        /// Timestamp text, if any.
        timestamp: Option<String>,
        /// Message text.
        content: String,
    },
}

impl ChatMessage {
    /// Creates a broadcast chat message.
    #[must_use]
    pub fn chat(sender_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            no: None,
            kind: MessageKind::Chat,
            sender_id: sender_id.into(),
            sender_label: None,
            recipient_id: None,
            content: content.into(),
            timestamp: None,
        }
    }

    /// Sets the server sequence number, builder style.
    #[must_use]
    pub const fn with_no(mut self, no: i64) -> Self {
        self.no = Some(no);
        self
    }

    /// The message's stable identity.
    #[must_use]
    pub fn key(&self) -> MessageKey {
        match self.no {
            Some(no) => MessageKey::Numbered(no),
            None => MessageKey::Derived {
                kind: self.kind,
                sender: self.sender_id.clone(),
                recipient: self.recipient_id.clone(),
                timestamp: self.timestamp.clone(),
                content: self.content.clone(),
            },
        }
    }
}

/// A page of history: snapshot frames and pagination responses share it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePage {
    /// Messages, oldest first.
    #[serde(rename = "messageList", default)]
    pub messages: Vec<ChatMessage>,
    /// `true` when nothing older exists on the server.
    #[serde(default = "default_last")]
    pub last: bool,
}

/// A page without `last` is the final page.
const fn default_last() -> bool {
    true
}

impl MessagePage {
    /// Whether older history remains on the server.
    #[must_use]
    pub const fn has_more(&self) -> bool {
        !self.last
    }
}

/// Body of every outbound SEND frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundBody {
    /// Message text.
    pub content: String,
}

/// Decodes an incremental frame body (one message).
///
/// # Errors
///
/// Returns [`PayloadError::Json`] if the body is not a message object.
pub fn decode_message(body: &str) -> Result<ChatMessage, PayloadError> {
    Ok(serde_json::from_str(body)?)
}

/// Decodes a snapshot frame body or pagination response.
///
/// # Errors
///
/// Returns [`PayloadError::Json`] if the body is not a page object.
pub fn decode_page(body: &str) -> Result<MessagePage, PayloadError> {
    Ok(serde_json::from_str(body)?)
}

/// Decodes a roster frame body (array of member ids).
///
/// # Errors
///
/// Returns [`PayloadError::Json`] if the body is not an array of strings.
pub fn decode_roster(body: &str) -> Result<Vec<String>, PayloadError> {
    Ok(serde_json::from_str(body)?)
}

/// Encodes the body of an outbound SEND frame.
///
/// # Errors
///
/// Returns [`PayloadError::Json`] if serialization fails.
pub fn encode_outbound(content: &str) -> Result<String, PayloadError> {
    Ok(serde_json::to_string(&OutboundBody {
        content: content.to_string(),
    })?)
}
