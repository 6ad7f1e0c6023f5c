use async_trait::async_trait;
use cockpit_dbus_core::Message;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Codec error: {0}")]
    Codec(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// One ordered, duplex channel of protocol frames.
///
/// All methods take `&self` so that a connection task can wait on `recv`
/// while other frames are being sent.
#[async_trait]
pub trait DbusTransport: Send + Sync {
    async fn send(&self, msg: Message) -> Result<(), TransportError>;
    /// `Ok(None)` once the peer has closed the channel.
    async fn recv(&self) -> Result<Option<Message>, TransportError>;
    async fn close(&self) -> Result<(), TransportError>;
}

#[async_trait]
impl<T: DbusTransport + ?Sized> DbusTransport for Arc<T> {
    async fn send(&self, msg: Message) -> Result<(), TransportError> {
        (**self).send(msg).await
    }

    async fn recv(&self) -> Result<Option<Message>, TransportError> {
        (**self).recv().await
    }

    async fn close(&self) -> Result<(), TransportError> {
        (**self).close().await
    }
}

#[async_trait]
impl<T: DbusTransport + ?Sized> DbusTransport for Box<T> {
    async fn send(&self, msg: Message) -> Result<(), TransportError> {
        (**self).send(msg).await
    }

    async fn recv(&self) -> Result<Option<Message>, TransportError> {
        (**self).recv().await
    }

    async fn close(&self) -> Result<(), TransportError> {
        (**self).close().await
    }
}
