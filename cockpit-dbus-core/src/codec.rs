use crate::message::{FrameError, Message};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Maximum encoded size of a single frame.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum FrameFormat {
    LengthPrefixed,
    #[default]
    NewlineDelimited,
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("frame of {0} bytes exceeds the maximum size")]
    TooLarge(usize),

    #[error("incomplete frame")]
    Incomplete,
}

pub fn encode_message(msg: &Message) -> Result<Bytes, CodecError> {
    let json = serde_json::to_vec(&msg.to_json())?;
    Ok(Bytes::from(json))
}

pub fn decode_message(data: &[u8]) -> Result<Message, CodecError> {
    let value: serde_json::Value = serde_json::from_slice(data)?;
    Ok(Message::from_json(&value)?)
}

pub fn encode_frame(msg: &Message, format: FrameFormat) -> Result<Bytes, CodecError> {
    let json = serde_json::to_vec(&msg.to_json())?;
    if json.len() > MAX_FRAME_SIZE {
        return Err(CodecError::TooLarge(json.len()));
    }

    match format {
        FrameFormat::LengthPrefixed => {
            let mut buf = BytesMut::with_capacity(4 + json.len());
            buf.put_u32(json.len() as u32);
            buf.put_slice(&json);
            Ok(buf.freeze())
        }
        FrameFormat::NewlineDelimited => {
            let mut buf = BytesMut::with_capacity(json.len() + 1);
            buf.put_slice(&json);
            buf.put_u8(b'\n');
            Ok(buf.freeze())
        }
    }
}

/// Decode one frame from the front of `data`, returning it and the bytes consumed.
pub fn decode_frame(data: &[u8], format: FrameFormat) -> Result<(Message, usize), CodecError> {
    match format {
        FrameFormat::LengthPrefixed => {
            if data.len() < 4 {
                return Err(CodecError::Incomplete);
            }
            let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
            if len > MAX_FRAME_SIZE {
                return Err(CodecError::TooLarge(len));
            }
            let total = 4 + len;
            if data.len() < total {
                return Err(CodecError::Incomplete);
            }
            Ok((decode_message(&data[4..total])?, total))
        }
        FrameFormat::NewlineDelimited => {
            let newline = data
                .iter()
                .position(|&b| b == b'\n')
                .ok_or(CodecError::Incomplete)?;
            Ok((decode_message(&data[..newline])?, newline + 1))
        }
    }
}

/// Accumulates bytes from a stream and yields complete frames.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buffer: BytesMut,
    format: FrameFormat,
}

impl FrameBuffer {
    pub fn new(format: FrameFormat) -> Self {
        FrameBuffer {
            buffer: BytesMut::with_capacity(4096),
            format,
        }
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.put_slice(data);
    }

    /// The next complete frame, or `None` if more bytes are needed.
    pub fn next_frame(&mut self) -> Result<Option<Message>, CodecError> {
        match decode_frame(&self.buffer, self.format) {
            Ok((msg, consumed)) => {
                self.buffer.advance(consumed);
                Ok(Some(msg))
            }
            Err(CodecError::Incomplete) => {
                if self.buffer.len() > MAX_FRAME_SIZE + 4 {
                    return Err(CodecError::TooLarge(self.buffer.len()));
                }
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::CallId;
    use crate::message::Frame;
    use serde_json::json;

    fn call() -> Message {
        Message::new(Frame::Call {
            id: CallId::new(1),
            path: "/otree/frobber".into(),
            interface: "com.redhat.Cockpit.DBusTests.Frobber".into(),
            member: "HelloWorld".into(),
            args: vec![json!("test")],
            signature: None,
            flags: None,
        })
    }

    #[test]
    fn test_newline_frame() {
        let msg = call();
        let frame = encode_frame(&msg, FrameFormat::NewlineDelimited).unwrap();
        assert_eq!(frame[frame.len() - 1], b'\n');

        let (decoded, consumed) = decode_frame(&frame, FrameFormat::NewlineDelimited).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(consumed, frame.len());
    }

    #[test]
    fn test_length_prefixed_frame() {
        let msg = Message::sequenced(4, Frame::Owner(None));
        let frame = encode_frame(&msg, FrameFormat::LengthPrefixed).unwrap();

        let (decoded, consumed) = decode_frame(&frame, FrameFormat::LengthPrefixed).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(consumed, frame.len());

        assert!(matches!(
            decode_frame(&frame[..2], FrameFormat::LengthPrefixed),
            Err(CodecError::Incomplete)
        ));
        assert!(matches!(
            decode_frame(&frame[..frame.len() - 1], FrameFormat::LengthPrefixed),
            Err(CodecError::Incomplete)
        ));
    }

    #[test]
    fn test_frame_buffer_splits_stream() {
        let first = call();
        let second = Message::sequenced(1, Frame::Owner(Some(":1.0".into())));

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&encode_frame(&first, FrameFormat::NewlineDelimited).unwrap());
        bytes.extend_from_slice(&encode_frame(&second, FrameFormat::NewlineDelimited).unwrap());

        let mut buffer = FrameBuffer::new(FrameFormat::NewlineDelimited);
        let (head, tail) = bytes.split_at(10);
        buffer.extend(head);
        assert!(buffer.next_frame().unwrap().is_none());

        buffer.extend(tail);
        assert_eq!(buffer.next_frame().unwrap(), Some(first));
        assert_eq!(buffer.next_frame().unwrap(), Some(second));
        assert_eq!(buffer.next_frame().unwrap(), None);
        assert_eq!(buffer.buffered(), 0);
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(matches!(
            decode_frame(b"{not json\n", FrameFormat::NewlineDelimited),
            Err(CodecError::Json(_))
        ));
        assert!(matches!(
            decode_frame(b"{\"bogus\": 1}\n", FrameFormat::NewlineDelimited),
            Err(CodecError::Frame(FrameError::UnknownFrame))
        ));
    }
}
