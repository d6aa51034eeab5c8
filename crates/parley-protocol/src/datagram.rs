//! Binary datagram layout.
//!
//! Every datagram starts with a one-byte type tag. Id-bearing kinds follow
//! it with a big-endian `u16` message id, then their fields in a fixed
//! order. Strings are NUL-terminated, booleans are a single `0`/`1` byte.
//!
//! ```text
//! CONFIRM  0x00 | ref_id
//! REPLY    0x01 | id | result:u8 | ref_id | content\0
//! AUTH     0x02 | id | username\0 | display_name\0 | secret\0
//! JOIN     0x03 | id | channel_id\0 | display_name\0
//! MSG      0x04 | id | display_name\0 | content\0
//! ERR      0xFE | id | display_name\0 | content\0
//! BYE      0xFF | id
//! ```
//!
//! The table is spelled out as one match arm per kind in both [`encode`]
//! and [`decode`].

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{Message, ProtocolError};

/// Per-session datagram sequence number.
pub type MessageId = u16;

/// Type tags, the first byte of every datagram.
pub mod tag {
    pub const CONFIRM: u8 = 0x00;
    pub const REPLY: u8 = 0x01;
    pub const AUTH: u8 = 0x02;
    pub const JOIN: u8 = 0x03;
    pub const MSG: u8 = 0x04;
    pub const ERR: u8 = 0xFE;
    pub const BYE: u8 = 0xFF;
}

/// A decoded datagram: either a transport-level acknowledgment or an
/// application message with its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datagram {
    /// Acknowledges receipt of the id-bearing datagram `ref_id`.
    Confirm { ref_id: MessageId },

    /// An application message.
    ///
    /// `reply_to` is only on the wire for `Reply`; it is ignored when
    /// encoding any other kind and decodes as `0` for them.
    Payload {
        id: MessageId,
        reply_to: MessageId,
        message: Message,
    },
}

impl Datagram {
    /// Wraps a message that is not a `Reply`.
    pub fn payload(id: MessageId, message: Message) -> Self {
        Self::Payload {
            id,
            reply_to: 0,
            message,
        }
    }
}

/// Encodes a datagram.
///
/// # Errors
/// Returns [`ProtocolError::InvalidField`] if the carried message breaks a
/// field constraint. Nothing is encoded in that case.
pub fn encode(datagram: &Datagram) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::with_capacity(64);
    match datagram {
        Datagram::Confirm { ref_id } => {
            buf.put_u8(tag::CONFIRM);
            buf.put_u16(*ref_id);
        }
        Datagram::Payload {
            id,
            reply_to,
            message,
        } => {
            message.validate()?;
            match message {
                Message::Reply { status, content } => {
                    buf.put_u8(tag::REPLY);
                    buf.put_u16(*id);
                    buf.put_u8(u8::from(*status));
                    buf.put_u16(*reply_to);
                    put_str(&mut buf, content);
                }
                Message::Auth {
                    username,
                    display_name,
                    secret,
                } => {
                    buf.put_u8(tag::AUTH);
                    buf.put_u16(*id);
                    put_str(&mut buf, username);
                    put_str(&mut buf, display_name);
                    put_str(&mut buf, secret);
                }
                Message::Join {
                    channel_id,
                    display_name,
                } => {
                    buf.put_u8(tag::JOIN);
                    buf.put_u16(*id);
                    put_str(&mut buf, channel_id);
                    put_str(&mut buf, display_name);
                }
                Message::Chat {
                    display_name,
                    content,
                } => {
                    buf.put_u8(tag::MSG);
                    buf.put_u16(*id);
                    put_str(&mut buf, display_name);
                    put_str(&mut buf, content);
                }
                Message::Error {
                    display_name,
                    content,
                } => {
                    buf.put_u8(tag::ERR);
                    buf.put_u16(*id);
                    put_str(&mut buf, display_name);
                    put_str(&mut buf, content);
                }
                Message::Bye => {
                    buf.put_u8(tag::BYE);
                    buf.put_u16(*id);
                }
            }
        }
    }
    Ok(buf.freeze())
}

/// Decodes one datagram.
///
/// # Errors
/// Fails on an unknown tag, a field cut short, bytes after the last
/// field, a boolean other than `0`/`1`, or a decoded message that breaks
/// a field constraint.
pub fn decode(mut buf: &[u8]) -> Result<Datagram, ProtocolError> {
    let tag = get_u8(&mut buf, "type")?;
    let datagram = match tag {
        tag::CONFIRM => Datagram::Confirm {
            ref_id: get_u16(&mut buf, "ref_id")?,
        },
        tag::REPLY => {
            let id = get_u16(&mut buf, "id")?;
            let status = get_bool(&mut buf, "result")?;
            let reply_to = get_u16(&mut buf, "ref_id")?;
            let content = get_str(&mut buf, "content")?;
            Datagram::Payload {
                id,
                reply_to,
                message: Message::Reply { status, content },
            }
        }
        tag::AUTH => {
            let id = get_u16(&mut buf, "id")?;
            let message = Message::Auth {
                username: get_str(&mut buf, "username")?,
                display_name: get_str(&mut buf, "display_name")?,
                secret: get_str(&mut buf, "secret")?,
            };
            Datagram::payload(id, message)
        }
        tag::JOIN => {
            let id = get_u16(&mut buf, "id")?;
            let message = Message::Join {
                channel_id: get_str(&mut buf, "channel_id")?,
                display_name: get_str(&mut buf, "display_name")?,
            };
            Datagram::payload(id, message)
        }
        tag::MSG => {
            let id = get_u16(&mut buf, "id")?;
            let message = Message::Chat {
                display_name: get_str(&mut buf, "display_name")?,
                content: get_str(&mut buf, "content")?,
            };
            Datagram::payload(id, message)
        }
        tag::ERR => {
            let id = get_u16(&mut buf, "id")?;
            let message = Message::Error {
                display_name: get_str(&mut buf, "display_name")?,
                content: get_str(&mut buf, "content")?,
            };
            Datagram::payload(id, message)
        }
        tag::BYE => Datagram::payload(get_u16(&mut buf, "id")?, Message::Bye),
        other => return Err(ProtocolError::UnknownTag(other)),
    };

    if buf.has_remaining() {
        return Err(ProtocolError::TrailingBytes(buf.remaining()));
    }
    if let Datagram::Payload { message, .. } = &datagram {
        message.validate()?;
    }
    Ok(datagram)
}

fn put_str(buf: &mut BytesMut, value: &str) {
    buf.put_slice(value.as_bytes());
    buf.put_u8(0);
}

fn get_u8(buf: &mut &[u8], field: &'static str) -> Result<u8, ProtocolError> {
    if buf.remaining() < 1 {
        return Err(ProtocolError::Truncated(field));
    }
    Ok(buf.get_u8())
}

fn get_u16(buf: &mut &[u8], field: &'static str) -> Result<u16, ProtocolError> {
    if buf.remaining() < 2 {
        return Err(ProtocolError::Truncated(field));
    }
    Ok(buf.get_u16())
}

fn get_bool(buf: &mut &[u8], field: &'static str) -> Result<bool, ProtocolError> {
    match get_u8(buf, field)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(ProtocolError::InvalidBool(other)),
    }
}

fn get_str(buf: &mut &[u8], field: &'static str) -> Result<String, ProtocolError> {
    let end = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or(ProtocolError::Truncated(field))?;
    let raw = &buf[..end];
    if !raw.is_ascii() {
        return Err(ProtocolError::NotAscii);
    }
    let value = String::from_utf8_lossy(raw).into_owned();
    buf.advance(end + 1);
    Ok(value)
}
