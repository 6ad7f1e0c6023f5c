use crate::codec::{CodecError, LengthPrefixedCodec, NewlineDelimitedCodec};
use crate::{DbusTransport, TransportError};
use async_trait::async_trait;
use cockpit_dbus_core::Message;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite};

/// Transport over any byte stream (pipes, unix sockets, TCP).
pub struct FramedTransport<T, C> {
    reader: Mutex<FramedRead<ReadHalf<T>, C>>,
    writer: Mutex<FramedWrite<WriteHalf<T>, C>>,
}

impl<T, C> FramedTransport<T, C>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
    C: Decoder<Item = Message, Error = CodecError>
        + Encoder<Message, Error = CodecError>
        + Clone
        + Send
        + 'static,
{
    pub fn new(io: T, codec: C) -> Self {
        let (read, write) = tokio::io::split(io);
        Self {
            reader: Mutex::new(FramedRead::new(read, codec.clone())),
            writer: Mutex::new(FramedWrite::new(write, codec)),
        }
    }
}

impl<T> FramedTransport<T, LengthPrefixedCodec>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn length_prefixed(io: T) -> Self {
        Self::new(io, LengthPrefixedCodec::new())
    }
}

impl<T> FramedTransport<T, NewlineDelimitedCodec>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn newline_delimited(io: T) -> Self {
        Self::new(io, NewlineDelimitedCodec::new())
    }
}

#[async_trait]
impl<T, C> DbusTransport for FramedTransport<T, C>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
    C: Decoder<Item = Message, Error = CodecError>
        + Encoder<Message, Error = CodecError>
        + Send
        + 'static,
{
    async fn send(&self, msg: Message) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        writer.send(msg).await.map_err(TransportError::from)
    }

    async fn recv(&self) -> Result<Option<Message>, TransportError> {
        let mut reader = self.reader.lock().await;
        match reader.next().await {
            Some(Ok(msg)) => Ok(Some(msg)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        writer.close().await.map_err(TransportError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cockpit_dbus_core::Frame;

    #[tokio::test]
    async fn test_duplex_newline_roundtrip() {
        let (left, right) = tokio::io::duplex(4096);
        let a = FramedTransport::newline_delimited(left);
        let b = FramedTransport::newline_delimited(right);

        a.send(Message::sequenced(1, Frame::Ready { unique_name: None }))
            .await
            .unwrap();
        let got = b.recv().await.unwrap().unwrap();
        assert_eq!(got.seq, Some(1));
        assert_eq!(got.frame.kind(), "ready");
    }

    #[tokio::test]
    async fn test_close_reaches_peer() {
        let (left, right) = tokio::io::duplex(4096);
        let a = FramedTransport::length_prefixed(left);
        let b = FramedTransport::length_prefixed(right);

        a.send(Message::new(Frame::Owner(None))).await.unwrap();
        a.close().await.unwrap();

        assert!(b.recv().await.unwrap().is_some());
        assert!(b.recv().await.unwrap().is_none());
    }
}
