//! Plain-text rendering of store contents for line-mode output.

use std::fmt::Write as _;

use chrono::format::{DelayedFormat, StrftimeItems};
use chrono::{DateTime, NaiveDateTime};

use stompchat_proto::message::{ChatMessage, MessageKind};

/// Formats a server timestamp with `format`, or returns `None` if it cannot
/// be parsed or `format` is not a valid strftime string.
///
/// Accepts RFC 3339 and the server's zone-less `YYYY-MM-DDTHH:MM:SS[.fff]`
/// (a space separator is accepted too).
#[must_use]
pub fn format_timestamp(raw: &str, format: &str) -> Option<String> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return render(&parsed.format(format));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|pattern| NaiveDateTime::parse_from_str(raw, pattern).ok())
        .and_then(|parsed| render(&parsed.format(format)))
}

/// `DelayedFormat` reports a bad specifier as `fmt::Error`; `to_string` would
/// panic on it.
fn render(formatted: &DelayedFormat<StrftimeItems<'_>>) -> Option<String> {
    let mut out = String::new();
    write!(out, "{formatted}").ok()?;
    Some(out)
}

/// One line for `message` as seen by `me`.
///
/// Direct messages are tagged with their direction relative to `me`.
#[must_use]
pub fn format_message(message: &ChatMessage, me: Option<&str>, time_format: &str) -> String {
    let time = message
        .timestamp
        .as_deref()
        .map(|raw| format_timestamp(raw, time_format).unwrap_or_else(|| raw.to_string()));
    let prefix = time.map(|t| format!("[{t}] ")).unwrap_or_default();

    let sender = match &message.sender_label {
        Some(label) if !label.is_empty() => format!("{} ({label})", message.sender_id),
        _ => message.sender_id.clone(),
    };

    match message.kind {
        MessageKind::Chat => format!("{prefix}{sender}: {}", message.content),
        MessageKind::Direct => {
            let recipient = message.recipient_id.as_deref().unwrap_or("?");
            if me.is_some_and(|me| me == message.sender_id) {
                format!("{prefix}(to {recipient}) {}", message.content)
            } else {
                format!("{prefix}(from {sender}) {}", message.content)
            }
        }
    }
}

/// Roster line with the local member marked `(me)`.
#[must_use]
pub fn format_roster(ids: &[String], me: Option<&str>) -> String {
    let names: Vec<String> = ids
        .iter()
        .map(|id| {
            if me == Some(id.as_str()) {
                format!("{id} (me)")
            } else {
                id.clone()
            }
        })
        .collect();
    format!("online ({}): {}", ids.len(), names.join(", "))
}
