//! Routing of locally typed input to a publish destination.
//!
//! Input starting with a whisper prefix (`/w ` or `/ㅈ `) is a direct
//! message: `<prefix><recipient> <content>`. Anything else is broadcast to
//! the session's scope. Nothing is appended locally; the server echoes the
//! message back through the incremental subscription.

use stompchat_proto::destination::{Destination, SessionScope};
use stompchat_proto::message;

use crate::connection::SessionHandle;

/// Prefixes that mark a direct message.
pub const DIRECT_PREFIXES: [&str; 2] = ["/w ", "/ㅈ "];

/// What a line of input asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Broadcast `content` to the current scope.
    Broadcast {
        /// Message text, verbatim.
        content: String,
    },
    /// Send `content` to one member.
    Direct {
        /// The recipient's member id.
        recipient: String,
        /// Message text.
        content: String,
    },
}

impl Outbound {
    /// Publish destination for this message within `scope`.
    #[must_use]
    pub fn destination(&self, scope: &SessionScope) -> Destination {
        match self {
            Self::Broadcast { .. } => Destination::broadcast(scope),
            Self::Direct { recipient, .. } => Destination::Direct {
                recipient: recipient.clone(),
            },
        }
    }

    /// The message text.
    #[must_use]
    pub fn content(&self) -> &str {
        match self {
            Self::Broadcast { content } | Self::Direct { content, .. } => content,
        }
    }
}

/// A whisper command that cannot be routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    /// No recipient between the prefix and the first space.
    #[error("direct message has no recipient")]
    MissingRecipient,
    /// The recipient runs to the end of the line with no space after it.
    #[error("direct message recipient is not followed by a space")]
    MissingSeparator,
}

/// Why [`send`] published nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// No session was given.
    NoSession,
    /// The session is superseded or not yet connected.
    NotConnected,
    /// The input is empty.
    EmptyInput,
    /// A whisper command without recipient or content.
    MalformedDirect(RoutingError),
    /// Direct messages need a logged-in session.
    DirectRequiresLogin,
    /// The SEND could not be delivered to the broker.
    Transport,
}

/// Result of [`send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// A SEND frame went out to `destination`.
    Sent {
        /// Where it was published.
        destination: Destination,
    },
    /// Nothing was published.
    Rejected(RejectReason),
}

/// Classify one line of input.
///
/// # Errors
///
/// Returns [`RoutingError`] for a whisper prefix with no space-delimited
/// recipient. `"/w bob "` is a valid whisper with empty content.
pub fn classify(input: &str) -> Result<Outbound, RoutingError> {
    let Some(rest) = DIRECT_PREFIXES
        .iter()
        .find_map(|prefix| input.strip_prefix(prefix))
    else {
        return Ok(Outbound::Broadcast {
            content: input.to_string(),
        });
    };

    let Some((recipient, content)) = rest.split_once(' ') else {
        return Err(if rest.is_empty() {
            RoutingError::MissingRecipient
        } else {
            RoutingError::MissingSeparator
        });
    };
    if recipient.is_empty() {
        return Err(RoutingError::MissingRecipient);
    }
    Ok(Outbound::Direct {
        recipient: recipient.to_string(),
        content: content.to_string(),
    })
}

/// Route `input` and publish it through `session`.
///
/// Never fails: every reason for not publishing is a [`SendOutcome::Rejected`].
pub async fn send(input: &str, session: Option<&SessionHandle>) -> SendOutcome {
    let Some(session) = session else {
        return SendOutcome::Rejected(RejectReason::NoSession);
    };
    if !session.is_connected() {
        return SendOutcome::Rejected(RejectReason::NotConnected);
    }
    if input.is_empty() {
        return SendOutcome::Rejected(RejectReason::EmptyInput);
    }

    let outbound = match classify(input) {
        Ok(outbound) => outbound,
        Err(e) => {
            tracing::warn!(error = %e, "dropping malformed direct message");
            return SendOutcome::Rejected(RejectReason::MalformedDirect(e));
        }
    };
    if matches!(outbound, Outbound::Direct { .. }) && !session.auth().is_authenticated() {
        tracing::warn!("direct messages require login");
        return SendOutcome::Rejected(RejectReason::DirectRequiresLogin);
    }

    let destination = outbound.destination(session.scope());
    let body = match message::encode_outbound(outbound.content()) {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(error = %e, "outbound body not encodable");
            return SendOutcome::Rejected(RejectReason::Transport);
        }
    };

    match session.publish(destination.clone(), body).await {
        Ok(()) => {
            tracing::debug!(destination = %destination, "message published");
            SendOutcome::Sent { destination }
        }
        Err(e) => {
            tracing::warn!(destination = %destination, error = %e, "publish failed");
            SendOutcome::Rejected(RejectReason::Transport)
        }
    }
}
