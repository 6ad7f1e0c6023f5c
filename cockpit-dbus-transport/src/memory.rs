use crate::{DbusTransport, TransportError};
use async_trait::async_trait;
use cockpit_dbus_core::Message;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

/// In-process transport, one end of a connected pair.
pub struct MemoryTransport {
    tx: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    rx: AsyncMutex<mpsc::UnboundedReceiver<Message>>,
}

impl MemoryTransport {
    /// Two connected ends: what one sends, the other receives.
    pub fn pair() -> (MemoryTransport, MemoryTransport) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            MemoryTransport {
                tx: Mutex::new(Some(a_tx)),
                rx: AsyncMutex::new(b_rx),
            },
            MemoryTransport {
                tx: Mutex::new(Some(b_tx)),
                rx: AsyncMutex::new(a_rx),
            },
        )
    }

    pub fn is_closed(&self) -> bool {
        match &*self.tx.lock() {
            Some(tx) => tx.is_closed(),
            None => true,
        }
    }
}

#[async_trait]
impl DbusTransport for MemoryTransport {
    async fn send(&self, msg: Message) -> Result<(), TransportError> {
        let guard = self.tx.lock();
        let tx = guard.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(msg).map_err(|_| TransportError::ConnectionClosed)
    }

    async fn recv(&self) -> Result<Option<Message>, TransportError> {
        Ok(self.rx.lock().await.recv().await)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.tx.lock().take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cockpit_dbus_core::Frame;

    #[tokio::test]
    async fn test_pair_delivers_in_order() {
        let (a, b) = MemoryTransport::pair();
        for n in 1..=3 {
            a.send(Message::sequenced(n, Frame::Owner(None))).await.unwrap();
        }
        for n in 1..=3 {
            assert_eq!(b.recv().await.unwrap().unwrap().seq, Some(n));
        }
    }

    #[tokio::test]
    async fn test_close_ends_peer_stream() {
        let (a, b) = MemoryTransport::pair();
        a.send(Message::new(Frame::Owner(None))).await.unwrap();
        a.close().await.unwrap();

        assert!(b.recv().await.unwrap().is_some());
        assert!(b.recv().await.unwrap().is_none());
        assert!(matches!(
            a.send(Message::new(Frame::Owner(None))).await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_send_to_dropped_peer_fails() {
        let (a, b) = MemoryTransport::pair();
        drop(b);
        assert!(a.is_closed());
        assert!(a.send(Message::new(Frame::Owner(None))).await.is_err());
    }
}
