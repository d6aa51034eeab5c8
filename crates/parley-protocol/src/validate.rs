//! Field constraints every message must satisfy before it is accepted
//! from, or put on, the wire.
//!
//! | field          | characters          | length   |
//! |----------------|---------------------|----------|
//! | `username`     | `[A-Za-z0-9-]`      | 1–20     |
//! | `channel_id`   | `[A-Za-z0-9-]`      | 1–20     |
//! | `display_name` | visible ASCII       | 1–20     |
//! | `secret`       | visible ASCII       | 1–128    |
//! | `content`      | printable ASCII     | 0–1400 (1–1400 for `Error`) |
//!
//! "Visible" is `0x21..=0x7E`; "printable" adds the space. Neither class
//! admits NUL or CR/LF, which is what keeps both encodings unambiguous.

use crate::{Message, ProtocolError};

/// Longest allowed `username` / `channel_id`.
pub const MAX_ID_LEN: usize = 20;
/// Longest allowed `display_name`.
pub const MAX_DISPLAY_NAME_LEN: usize = 20;
/// Longest allowed `secret`.
pub const MAX_SECRET_LEN: usize = 128;
/// Longest allowed `content`.
pub const MAX_CONTENT_LEN: usize = 1400;

fn is_id_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-'
}

fn is_visible_byte(b: u8) -> bool {
    matches!(b, 0x21..=0x7e)
}

fn is_printable_byte(b: u8) -> bool {
    matches!(b, 0x20..=0x7e)
}

fn check(
    field: &'static str,
    value: &str,
    min: usize,
    max: usize,
    allowed: fn(u8) -> bool,
) -> Result<(), ProtocolError> {
    let len = value.len();
    if len < min || len > max {
        return Err(ProtocolError::invalid(
            field,
            format!("length {len} outside {min}..={max}"),
        ));
    }
    if let Some(pos) = value.bytes().position(|b| !allowed(b)) {
        return Err(ProtocolError::invalid(
            field,
            format!("disallowed character at position {pos}"),
        ));
    }
    Ok(())
}

impl Message {
    /// Checks every field against its constraint.
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidField`] naming the first field
    /// that fails.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            Self::Auth {
                username,
                display_name,
                secret,
            } => {
                check("username", username, 1, MAX_ID_LEN, is_id_byte)?;
                check_display_name(display_name)?;
                check("secret", secret, 1, MAX_SECRET_LEN, is_visible_byte)
            }
            Self::Join {
                channel_id,
                display_name,
            } => {
                check("channel_id", channel_id, 1, MAX_ID_LEN, is_id_byte)?;
                check_display_name(display_name)
            }
            Self::Chat {
                display_name,
                content,
            } => {
                check_display_name(display_name)?;
                check_content(content, 0)
            }
            Self::Reply { content, .. } => check_content(content, 0),
            Self::Error {
                display_name,
                content,
            } => {
                check_display_name(display_name)?;
                check_content(content, 1)
            }
            Self::Bye => Ok(()),
        }
    }
}

fn check_display_name(value: &str) -> Result<(), ProtocolError> {
    check(
        "display_name",
        value,
        1,
        MAX_DISPLAY_NAME_LEN,
        is_visible_byte,
    )
}

fn check_content(value: &str, min: usize) -> Result<(), ProtocolError> {
    check("content", value, min, MAX_CONTENT_LEN, is_printable_byte)
}
