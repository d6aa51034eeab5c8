//! The tagged message representation shared by both wire encodings.
//!
//! A [`Message`] is what the protocol engine reasons about. The datagram
//! codec and the line grammar both decode into it and encode out of it,
//! so the engine never sees a byte layout or a keyword.

use std::fmt;

use serde::Serialize;

/// Display name used for every message the server itself originates.
pub const SERVER_DISPLAY_NAME: &str = "Server";

/// Channel every session starts in.
pub const DEFAULT_CHANNEL: &str = "general";

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// One of the six application message kinds.
///
/// Field constraints (see [`Message::validate`]) are not enforced by the
/// type itself: decoders validate before handing a message out, and
/// encoders validate before putting one on the wire.
///
/// The serde derive exists for the traffic log. The `secret` of an
/// `Auth` is never serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Client asks to authenticate as `username`.
    Auth {
        username: String,
        display_name: String,
        #[serde(skip_serializing)]
        secret: String,
    },

    /// Client asks to switch to `channel_id`.
    Join {
        channel_id: String,
        display_name: String,
    },

    /// A chat line, either from a client or a server notice.
    Chat {
        display_name: String,
        content: String,
    },

    /// Positive or negative answer to an `Auth` or `Join`.
    Reply { status: bool, content: String },

    /// A fault report. Receiving one ends the session.
    Error {
        display_name: String,
        content: String,
    },

    /// Orderly end of the session.
    Bye,
}

impl Message {
    /// A chat line from the server.
    pub fn notice(content: impl Into<String>) -> Self {
        Self::Chat {
            display_name: SERVER_DISPLAY_NAME.to_string(),
            content: content.into(),
        }
    }

    /// A reply with the given status.
    pub fn reply(status: bool, content: impl Into<String>) -> Self {
        Self::Reply {
            status,
            content: content.into(),
        }
    }

    /// An error originated by the server.
    ///
    /// The content is passed through [`sanitize_content`] so that the
    /// error always satisfies its own field constraints, whatever text
    /// the fault produced.
    pub fn server_error(content: &str) -> Self {
        let mut content = sanitize_content(content);
        if content.is_empty() {
            content.push_str("Internal error");
        }
        Self::Error {
            display_name: SERVER_DISPLAY_NAME.to_string(),
            content,
        }
    }

    /// The kind of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Auth { .. } => MessageKind::Auth,
            Self::Join { .. } => MessageKind::Join,
            Self::Chat { .. } => MessageKind::Chat,
            Self::Reply { .. } => MessageKind::Reply,
            Self::Error { .. } => MessageKind::Error,
            Self::Bye => MessageKind::Bye,
        }
    }

    /// `true` for the kinds whose sender waits for a `Reply`.
    pub fn expects_reply(&self) -> bool {
        matches!(self, Self::Auth { .. } | Self::Join { .. })
    }

    /// Renders the message fields as JSON for the traffic log.
    #[cfg(feature = "json")]
    pub fn to_log_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!("{{\"unrenderable\":\"{e}\"}}"))
    }

    #[cfg(feature = "json")]
    fn log_fields(&self) -> String {
        self.to_log_json()
    }

    #[cfg(not(feature = "json"))]
    fn log_fields(&self) -> String {
        String::new()
    }
}

/// `KIND {fields}`, the form used by the traffic log.
impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.log_fields())
    }
}

// ---------------------------------------------------------------------------
// MessageKind
// ---------------------------------------------------------------------------

/// Payload-free discriminant of [`Message`], printed with its wire keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Auth,
    Join,
    Chat,
    Reply,
    Error,
    Bye,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keyword = match self {
            Self::Auth => "AUTH",
            Self::Join => "JOIN",
            Self::Chat => "MSG",
            Self::Reply => "REPLY",
            Self::Error => "ERR",
            Self::Bye => "BYE",
        };
        f.write_str(keyword)
    }
}

/// Strips everything but printable ASCII and caps the result at
/// [`MAX_CONTENT_LEN`](crate::MAX_CONTENT_LEN) characters.
pub fn sanitize_content(text: &str) -> String {
    text.chars()
        .filter(|c| matches!(c, ' '..='~'))
        .take(crate::MAX_CONTENT_LEN)
        .collect()
}
