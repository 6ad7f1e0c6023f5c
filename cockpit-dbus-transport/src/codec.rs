//! `tokio-util` codecs for the two byte stream framings.
//!
//! Both defer to the frame encoding in `cockpit_dbus_core::codec`; they only
//! own the buffering and the per-stream size limit.

use bytes::{Buf, BufMut, BytesMut};
use cockpit_dbus_core::codec::{self as frame, MAX_FRAME_SIZE};
use cockpit_dbus_core::Message;
use std::io;
use tokio_util::codec::{Decoder, Encoder};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),

    #[error("line of {0} bytes exceeds the limit")]
    LineTooLong(usize),

    #[error("undecodable frame: {0}")]
    Frame(#[from] frame::CodecError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<CodecError> for crate::TransportError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Io(e) => crate::TransportError::Io(e),
            other => crate::TransportError::Codec(other.to_string()),
        }
    }
}

/// Frames prefixed by a 4-byte big-endian length.
#[derive(Debug, Clone)]
pub struct LengthPrefixedCodec {
    max_frame_size: usize,
}

impl LengthPrefixedCodec {
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.min(MAX_FRAME_SIZE),
        }
    }
}

impl Default for LengthPrefixedCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LengthPrefixedCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, CodecError> {
        let Some(header) = src.get(..4) else {
            return Ok(None);
        };
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if len > self.max_frame_size {
            return Err(CodecError::FrameTooLarge(len));
        }
        if src.len() < 4 + len {
            src.reserve(4 + len - src.len());
            return Ok(None);
        }

        src.advance(4);
        let body = src.split_to(len);
        Ok(Some(frame::decode_message(&body)?))
    }
}

impl Encoder<Message> for LengthPrefixedCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), CodecError> {
        let body = frame::encode_message(&item)?;
        if body.len() > self.max_frame_size {
            return Err(CodecError::FrameTooLarge(body.len()));
        }
        dst.reserve(4 + body.len());
        dst.put_u32(body.len() as u32);
        dst.put_slice(&body);
        Ok(())
    }
}

/// One JSON frame per line. Blank lines are skipped.
#[derive(Debug, Clone)]
pub struct NewlineDelimitedCodec {
    max_line_length: usize,
    // bytes already known to hold no newline
    scanned: usize,
}

impl NewlineDelimitedCodec {
    pub fn new() -> Self {
        Self::with_max_line_length(MAX_FRAME_SIZE)
    }

    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            max_line_length: max_line_length.min(MAX_FRAME_SIZE),
            scanned: 0,
        }
    }
}

impl Default for NewlineDelimitedCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for NewlineDelimitedCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, CodecError> {
        loop {
            let newline = src[self.scanned..]
                .iter()
                .position(|&b| b == b'\n')
                .map(|offset| self.scanned + offset);
            let Some(end) = newline else {
                self.scanned = src.len();
                if src.len() > self.max_line_length {
                    return Err(CodecError::LineTooLong(src.len()));
                }
                return Ok(None);
            };
            self.scanned = 0;
            if end > self.max_line_length {
                return Err(CodecError::LineTooLong(end));
            }

            let line = src.split_to(end + 1);
            let line = &line[..end];
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Ok(Some(frame::decode_message(line)?));
        }
    }
}

impl Encoder<Message> for NewlineDelimitedCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), CodecError> {
        let line = frame::encode_message(&item)?;
        if line.len() > self.max_line_length {
            return Err(CodecError::LineTooLong(line.len()));
        }
        dst.reserve(line.len() + 1);
        dst.put_slice(&line);
        dst.put_u8(b'\n');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cockpit_dbus_core::{CallId, Frame};
    use serde_json::json;

    fn hello() -> Message {
        Message::new(Frame::Call {
            id: CallId::new(1),
            path: "/otree/frobber".into(),
            interface: "com.redhat.Cockpit.DBusTests.Frobber".into(),
            member: "HelloWorld".into(),
            args: vec![json!("Browser-side JS")],
            signature: None,
            flags: None,
        })
    }

    #[test]
    fn test_length_prefixed_roundtrip() {
        let mut codec = LengthPrefixedCodec::new();
        let mut buffer = BytesMut::new();
        codec.encode(hello(), &mut buffer).unwrap();
        assert_eq!(codec.decode(&mut buffer).unwrap(), Some(hello()));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_length_prefixed_waits_for_whole_frame() {
        let mut codec = LengthPrefixedCodec::new();
        let mut encoded = BytesMut::new();
        codec.encode(hello(), &mut encoded).unwrap();

        let mut buffer = BytesMut::new();
        buffer.put_slice(&encoded[..2]);
        assert!(codec.decode(&mut buffer).unwrap().is_none());
        buffer.put_slice(&encoded[2..10]);
        assert!(codec.decode(&mut buffer).unwrap().is_none());
        buffer.put_slice(&encoded[10..]);
        assert_eq!(codec.decode(&mut buffer).unwrap(), Some(hello()));
    }

    #[test]
    fn test_size_limits() {
        let mut buffer = BytesMut::new();
        assert!(matches!(
            LengthPrefixedCodec::with_max_frame_size(32).encode(hello(), &mut buffer),
            Err(CodecError::FrameTooLarge(_))
        ));

        let mut buffer = BytesMut::from(&b"\x00\x00\x10\x00"[..]);
        assert!(matches!(
            LengthPrefixedCodec::with_max_frame_size(64).decode(&mut buffer),
            Err(CodecError::FrameTooLarge(4096))
        ));
    }

    #[test]
    fn test_newline_split_reads_and_blank_lines() {
        let mut codec = NewlineDelimitedCodec::new();
        let mut encoded = BytesMut::new();
        codec.encode(hello(), &mut encoded).unwrap();
        codec
            .encode(Message::sequenced(2, Frame::Owner(None)), &mut encoded)
            .unwrap();

        let mut buffer = BytesMut::from(&b"\n  \n"[..]);
        buffer.put_slice(&encoded[..7]);
        assert!(codec.decode(&mut buffer).unwrap().is_none());
        buffer.put_slice(&encoded[7..]);

        assert_eq!(codec.decode(&mut buffer).unwrap(), Some(hello()));
        let second = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(second.seq, Some(2));
        assert!(codec.decode(&mut buffer).unwrap().is_none());
    }

    #[test]
    fn test_newline_rejects_garbage() {
        let mut codec = NewlineDelimitedCodec::new();
        let mut buffer = BytesMut::from(&b"{oops\n"[..]);
        assert!(matches!(
            codec.decode(&mut buffer),
            Err(CodecError::Frame(frame::CodecError::Json(_)))
        ));

        let mut buffer = BytesMut::from(&b"{\"what\": 1}\n"[..]);
        assert!(matches!(
            codec.decode(&mut buffer),
            Err(CodecError::Frame(frame::CodecError::Frame(_)))
        ));
    }
}
