//! STOMP 1.2 frame model and text codec.
//!
//! Each frame travels as one WebSocket text message:
//!
//! ```text
//! COMMAND\n
//! name:value\n
//! ...
//! \n
//! body\0
//! ```
//!
//! A message made only of end-of-line characters is a heart-beat and
//! decodes to `None`. Header values are escaped (`\\`, `\n`, `\r`, `\c`)
//! on every frame except `CONNECT` and `CONNECTED`.

use std::fmt;

/// Error type for frame decoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The command line names no known STOMP command.
    #[error("unknown command: {0:?}")]
    UnknownCommand(String),
    /// A header line has no `:` separator.
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),
    /// A header contains an escape sequence STOMP 1.2 does not define.
    #[error("invalid escape sequence in header: {0:?}")]
    InvalidEscape(String),
    /// The frame ended before the blank line or NUL terminator.
    #[error("frame is missing its terminator")]
    MissingTerminator,
    /// The `content-length` header is not a usable byte count.
    #[error("invalid content-length: {0}")]
    InvalidContentLength(String),
}

/// STOMP commands used by the chat client and its broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Client opens a session (`STOMP` is accepted as a synonym).
    Connect,
    /// Broker accepts a session.
    Connected,
    /// Client publishes to a destination.
    Send,
    /// Client subscribes to a topic.
    Subscribe,
    /// Client drops a subscription.
    Unsubscribe,
    /// Client ends the session.
    Disconnect,
    /// Broker delivers a message for a subscription.
    Message,
    /// Broker acknowledges a frame that carried a `receipt` header.
    Receipt,
    /// Broker reports a failure; the connection closes afterwards.
    Error,
}

impl Command {
    /// Wire spelling of the command.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    fn parse(line: &str) -> Result<Self, FrameError> {
        match line {
            "CONNECT" | "STOMP" => Ok(Self::Connect),
            "CONNECTED" => Ok(Self::Connected),
            "SEND" => Ok(Self::Send),
            "SUBSCRIBE" => Ok(Self::Subscribe),
            "UNSUBSCRIBE" => Ok(Self::Unsubscribe),
            "DISCONNECT" => Ok(Self::Disconnect),
            "MESSAGE" => Ok(Self::Message),
            "RECEIPT" => Ok(Self::Receipt),
            "ERROR" => Ok(Self::Error),
            other => Err(FrameError::UnknownCommand(other.to_string())),
        }
    }

    const fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single STOMP frame.
///
/// Headers keep their wire order. When a header name repeats, the first
/// occurrence is authoritative (STOMP 1.2 §"Repeated Header Entries").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The frame command.
    pub command: Command,
    headers: Vec<(String, String)>,
    /// UTF-8 frame body (JSON for every payload this protocol carries).
    pub body: String,
}

impl Frame {
    /// Creates a frame with no headers and an empty body.
    #[must_use]
    pub const fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Appends a header, builder style.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Appends every header from `pairs`, builder style.
    #[must_use]
    pub fn headers<'a>(mut self, pairs: impl IntoIterator<Item = &'a (String, String)>) -> Self {
        self.headers.extend(pairs.into_iter().cloned());
        self
    }

    /// Sets the body, builder style.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the first value of header `name`, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Iterates headers in wire order.
    pub fn header_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Encodes the frame to its wire text, NUL terminator included.
    ///
    /// A `content-length` header is added for non-empty bodies unless the
    /// caller already set one.
    #[must_use]
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            push_header_text(&mut out, name, escape);
            out.push(':');
            push_header_text(&mut out, value, escape);
            out.push('\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str("content-length:");
            out.push_str(&self.body.len().to_string());
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

/// Decodes one frame from wire text.
///
/// Returns `Ok(None)` for a heart-beat (text made only of EOLs).
///
/// # Errors
///
/// Returns a [`FrameError`] when the text is not a well-formed frame.
pub fn decode(text: &str) -> Result<Option<Frame>, FrameError> {
    let text = text.trim_start_matches(['\r', '\n']);
    if text.is_empty() {
        return Ok(None);
    }

    let (command_line, mut rest) = next_line(text).ok_or(FrameError::MissingTerminator)?;
    let command = Command::parse(command_line)?;
    let escaped = command.escapes_headers();

    let mut headers = Vec::new();
    loop {
        let (line, after) = next_line(rest).ok_or(FrameError::MissingTerminator)?;
        rest = after;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
        if escaped {
            headers.push((unescape(name)?, unescape(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let frame = Frame {
        command,
        headers,
        body: String::new(),
    };
    let body = match frame.get("content-length") {
        Some(raw) => {
            let len: usize = raw
                .trim()
                .parse()
                .map_err(|_| FrameError::InvalidContentLength(raw.to_string()))?;
            let body = rest
                .get(..len)
                .ok_or_else(|| FrameError::InvalidContentLength(raw.to_string()))?;
            if rest.as_bytes().get(len) != Some(&0) {
                return Err(FrameError::MissingTerminator);
            }
            body
        }
        None => {
            let end = rest.find('\0').ok_or(FrameError::MissingTerminator)?;
            &rest[..end]
        }
    };

    Ok(Some(Frame {
        body: body.to_string(),
        ..frame
    }))
}

/// Splits off one line, accepting both `\n` and `\r\n` endings.
fn next_line(text: &str) -> Option<(&str, &str)> {
    let idx = text.find('\n')?;
    let line = text[..idx].strip_suffix('\r').unwrap_or(&text[..idx]);
    Some((line, &text[idx + 1..]))
}

fn push_header_text(out: &mut String, text: &str, escape: bool) {
    if !escape {
        out.push_str(text);
        return;
    }
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
}

fn unescape(text: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(FrameError::InvalidEscape(text.to_string())),
        }
    }
    Ok(out)
}
