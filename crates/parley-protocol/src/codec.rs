//! tokio-util codec for the CRLF line grammar.
//!
//! [`LineCodec`] splits a byte stream on CRLF and parses each line with
//! [`crate::line::parse`]. A bad line is yielded as an `Err` item rather
//! than a decoder error, so the stream stays usable after it; only I/O
//! failures surface as `io::Error`.

use std::io;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::line::{self, CRLF, MAX_LINE_LEN};
use crate::{Message, ProtocolError};

/// Frames [`Message`]s as CRLF-terminated lines.
///
/// Lines longer than [`MAX_LINE_LEN`] (terminator included) yield
/// [`ProtocolError::LineTooLong`]; the rest of that line is skipped.
#[derive(Debug, Clone, Default)]
pub struct LineCodec {
    /// How far `src` has already been searched for a terminator.
    next_index: usize,
    /// Inside an overlong line, dropping bytes up to its terminator.
    discarding: bool,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn find_crlf(&self, src: &BytesMut) -> Option<usize> {
        // A '\r' may have been the last byte searched last time.
        let start = self.next_index.saturating_sub(1);
        src[start..]
            .windows(2)
            .position(|pair| pair == CRLF.as_bytes())
            .map(|offset| start + offset)
    }
}

/// Parses one line, terminator already stripped.
fn parse_line(line: &[u8]) -> Result<Message, ProtocolError> {
    if !line.is_ascii() {
        return Err(ProtocolError::NotAscii);
    }
    let text = std::str::from_utf8(line).map_err(|_| ProtocolError::NotAscii)?;
    line::parse(text)
}

impl Decoder for LineCodec {
    type Item = Result<Message, ProtocolError>;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.find_crlf(src) {
                Some(end) => {
                    let frame = src.split_to(end + CRLF.len());
                    self.next_index = 0;
                    if self.discarding {
                        self.discarding = false;
                        continue;
                    }
                    if frame.len() > MAX_LINE_LEN {
                        return Ok(Some(Err(ProtocolError::LineTooLong(MAX_LINE_LEN))));
                    }
                    return Ok(Some(parse_line(&frame[..end])));
                }
                None if src.len() > MAX_LINE_LEN || self.discarding => {
                    let keep = usize::from(src.ends_with(b"\r"));
                    src.advance(src.len() - keep);
                    self.next_index = keep;
                    if self.discarding {
                        return Ok(None);
                    }
                    self.discarding = true;
                    return Ok(Some(Err(ProtocolError::LineTooLong(MAX_LINE_LEN))));
                }
                None => {
                    self.next_index = src.len();
                    return Ok(None);
                }
            }
        }
    }
}

impl Encoder<&Message> for LineCodec {
    type Error = io::Error;

    fn encode(&mut self, message: &Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = line::encode(message)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        dst.reserve(line.len());
        dst.put_slice(line.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut LineCodec, buf: &mut BytesMut) -> Vec<Result<Message, ProtocolError>> {
        let mut items = Vec::new();
        while let Some(item) = codec.decode(buf).unwrap() {
            items.push(item);
        }
        items
    }

    #[test]
    fn test_line_codec_waits_for_crlf() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"BYE\r"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.put_slice(b"\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Ok(Message::Bye)));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_line_codec_lone_lf_does_not_end_line() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"BYE\nBYE\r\n"[..]);
        assert_eq!(
            decode_all(&mut codec, &mut buf),
            vec![Err(ProtocolError::UnknownMessage("BYE\nBYE".into()))]
        );
    }

    #[test]
    fn test_line_codec_several_lines_in_one_read() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"BYE\r\nFOO\r\nbye\r\n"[..]);
        assert_eq!(
            decode_all(&mut codec, &mut buf),
            vec![
                Ok(Message::Bye),
                Err(ProtocolError::UnknownMessage("FOO".into())),
                Ok(Message::Bye),
            ]
        );
    }

    #[test]
    fn test_line_codec_rejects_non_ascii() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from("MSG FROM Bob IS h\u{e9}\r\n".as_bytes());
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Err(ProtocolError::NotAscii))
        );
    }

    #[test]
    fn test_line_codec_overlong_line_reported_once_then_skipped() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"MSG FROM Bob IS "[..]);
        buf.resize(MAX_LINE_LEN + 1, b'a');
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Err(ProtocolError::LineTooLong(MAX_LINE_LEN)))
        );

        buf.put_slice(b"aaaa\r\nBYE\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Ok(Message::Bye)));
    }

    #[test]
    fn test_line_codec_longest_content_is_accepted() {
        let mut codec = LineCodec::new();
        let content = "a".repeat(1400);
        let line = format!("MSG FROM Bob IS {content}\r\n");
        let mut buf = BytesMut::from(line.as_bytes());
        assert!(matches!(codec.decode(&mut buf).unwrap(), Some(Ok(Message::Chat { .. }))));
    }

    #[test]
    fn test_line_codec_encode_appends_crlf() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(&Message::Bye, &mut buf).unwrap();
        assert_eq!(&buf[..], b"BYE\r\n");
    }

    #[test]
    fn test_line_codec_encode_rejects_invalid_message() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();
        let bad = Message::Join {
            channel_id: "no spaces".into(),
            display_name: "Bob".into(),
        };
        let err = codec.encode(&bad, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(buf.is_empty());
    }
}
