//! Wire protocol for Parley.
//!
//! - **Types** ([`Message`], [`MessageKind`]): the six application
//!   message kinds every session exchanges, whatever the transport.
//! - **Validation** ([`Message::validate`]): the character-class and
//!   length constraints a message must meet to be accepted or sent.
//! - **Encodings**: the binary [`datagram`] layout and the CRLF [`line`]
//!   grammar. [`LineCodec`] frames the grammar for `tokio_util::codec`.
//! - **Errors** ([`ProtocolError`]): every way bytes or a line can fail
//!   to be a valid message.
//!
//! ```text
//! Transport (bytes / lines) → Protocol (Message) → Engine (state machine)
//! ```

mod codec;
pub mod datagram;
mod error;
pub mod line;
mod types;
mod validate;

pub use codec::LineCodec;
pub use datagram::{Datagram, MessageId};
pub use error::ProtocolError;
pub use types::{
    DEFAULT_CHANNEL, Message, MessageKind, SERVER_DISPLAY_NAME, sanitize_content,
};
pub use validate::{MAX_CONTENT_LEN, MAX_DISPLAY_NAME_LEN, MAX_ID_LEN, MAX_SECRET_LEN};
