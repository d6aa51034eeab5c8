//! Error types for the protocol layer.
//!
//! Every variant here is a wire-level violation: the bytes or the line we
//! were handed cannot be turned into a valid [`Message`](crate::Message),
//! or a message we were asked to encode breaks a field constraint.

/// Errors that can occur while validating, encoding, or decoding messages.
///
/// The `Display` text of a variant is what ends up in the `ERR` message
/// sent back to a misbehaving peer, so keep it short and printable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// A stream line that matches none of the grammar shapes.
    #[error("Unknown message type: {0}")]
    UnknownMessage(String),

    /// A `REPLY` line whose status word is neither `OK` nor `NOK`.
    #[error("Invalid reply status: {0}")]
    InvalidReplyStatus(String),

    /// A field breaks its character-class or length constraint.
    #[error("Invalid {field}: {reason}")]
    InvalidField {
        /// Wire name of the offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// The first byte of a datagram is not a known message tag.
    #[error("Unknown datagram type 0x{0:02x}")]
    UnknownTag(u8),

    /// A datagram ended before the named field was complete.
    #[error("Truncated datagram: missing {0}")]
    Truncated(&'static str),

    /// Bytes left over after the last declared field.
    #[error("Datagram has {0} unexpected trailing bytes")]
    TrailingBytes(usize),

    /// A boolean byte other than 0 or 1.
    #[error("Invalid boolean byte 0x{0:02x}")]
    InvalidBool(u8),

    /// A stream line containing non-ASCII bytes.
    #[error("Line is not valid ASCII")]
    NotAscii,

    /// A stream line longer than the framing limit.
    #[error("Line exceeds {0} bytes")]
    LineTooLong(usize),
}

impl ProtocolError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}
