//! CRLF-terminated ASCII line grammar.
//!
//! ```text
//! AUTH <username> AS <display_name> USING <secret>
//! JOIN <channel_id> AS <display_name>
//! MSG FROM <display_name> IS <content...>
//! ERR FROM <display_name> IS <content...>
//! REPLY (OK|NOK) IS <content...>
//! BYE
//! ```
//!
//! Keywords match case-insensitively. `<content...>` is the rest of the
//! line verbatim, spaces included.

use crate::{Message, ProtocolError};

/// Line terminator.
pub const CRLF: &str = "\r\n";

/// Longest accepted line, terminator included.
pub const MAX_LINE_LEN: usize = 4096;

/// Parses one line with its terminator already stripped.
///
/// # Errors
/// Returns [`ProtocolError::UnknownMessage`] for a line matching no shape,
/// [`ProtocolError::InvalidReplyStatus`] for a `REPLY` whose status word is
/// not `OK`/`NOK`, and [`ProtocolError::InvalidField`] when a field breaks
/// its constraint.
pub fn parse(line: &str) -> Result<Message, ProtocolError> {
    let words: Vec<&str> = line.split(' ').collect();
    let keyword = words[0].to_ascii_uppercase();

    let message = match (keyword.as_str(), words.as_slice()) {
        ("AUTH", [_, username, as_, display_name, using, secret])
            if is(as_, "AS") && is(using, "USING") =>
        {
            Message::Auth {
                username: username.to_string(),
                display_name: display_name.to_string(),
                secret: secret.to_string(),
            }
        }
        ("JOIN", [_, channel_id, as_, display_name]) if is(as_, "AS") => Message::Join {
            channel_id: channel_id.to_string(),
            display_name: display_name.to_string(),
        },
        ("MSG", [_, from, display_name, is_, ..]) if is(from, "FROM") && is(is_, "IS") => {
            Message::Chat {
                display_name: display_name.to_string(),
                content: remainder(line, 4).to_string(),
            }
        }
        ("ERR", [_, from, display_name, is_, ..]) if is(from, "FROM") && is(is_, "IS") => {
            Message::Error {
                display_name: display_name.to_string(),
                content: remainder(line, 4).to_string(),
            }
        }
        ("REPLY", [_, status, is_, ..]) if is(is_, "IS") => Message::Reply {
            status: parse_status(status)?,
            content: remainder(line, 3).to_string(),
        },
        ("BYE", [_]) => Message::Bye,
        _ => return Err(ProtocolError::UnknownMessage(line.to_string())),
    };

    message.validate()?;
    Ok(message)
}

/// Encodes a message as one line, terminator included.
///
/// # Errors
/// Returns [`ProtocolError::InvalidField`] if the message breaks a field
/// constraint.
pub fn encode(message: &Message) -> Result<String, ProtocolError> {
    message.validate()?;
    let line = match message {
        Message::Auth {
            username,
            display_name,
            secret,
        } => format!("AUTH {username} AS {display_name} USING {secret}"),
        Message::Join {
            channel_id,
            display_name,
        } => format!("JOIN {channel_id} AS {display_name}"),
        Message::Chat {
            display_name,
            content,
        } => format!("MSG FROM {display_name} IS {content}"),
        Message::Error {
            display_name,
            content,
        } => format!("ERR FROM {display_name} IS {content}"),
        Message::Reply { status, content } => {
            let status = if *status { "OK" } else { "NOK" };
            format!("REPLY {status} IS {content}")
        }
        Message::Bye => "BYE".to_string(),
    };
    Ok(line + CRLF)
}

fn is(word: &str, keyword: &str) -> bool {
    word.eq_ignore_ascii_case(keyword)
}

fn parse_status(word: &str) -> Result<bool, ProtocolError> {
    if is(word, "OK") {
        Ok(true)
    } else if is(word, "NOK") {
        Ok(false)
    } else {
        Err(ProtocolError::InvalidReplyStatus(word.to_string()))
    }
}

/// Everything after the first `n` space-separated words.
fn remainder(line: &str, n: usize) -> &str {
    line.splitn(n + 1, ' ').nth(n).unwrap_or("")
}
