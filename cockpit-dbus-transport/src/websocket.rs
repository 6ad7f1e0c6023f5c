use crate::{DbusTransport, TransportError};
use async_trait::async_trait;
use cockpit_dbus_core::{decode_message, encode_message, Message};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_tungstenite::{tungstenite, WebSocketStream};
use tungstenite::protocol::Message as WsMessage;

/// Transport carrying one JSON frame per WebSocket text message.
pub struct WebSocketTransport {
    tx: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    rx: AsyncMutex<mpsc::UnboundedReceiver<Result<Message, TransportError>>>,
}

impl WebSocketTransport {
    pub fn new<S>(stream: WebSocketStream<S>) -> Self
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
    {
        let (mut sink, mut source) = stream.split();
        let (tx, mut outgoing) = mpsc::unbounded_channel::<Message>();
        let (incoming, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(item) = source.next().await {
                let msg = match item {
                    Ok(msg) => msg,
                    Err(e) => {
                        tracing::warn!(error = %e, "websocket receive failed");
                        let _ = incoming.send(Err(TransportError::Protocol(e.to_string())));
                        break;
                    }
                };
                let decoded = match msg {
                    WsMessage::Text(text) => decode_message(text.as_str().as_bytes()),
                    WsMessage::Binary(data) => decode_message(&data),
                    WsMessage::Close(_) => break,
                    _ => continue,
                };
                match decoded {
                    Ok(message) => {
                        if incoming.send(Ok(message)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to decode websocket frame");
                        let _ = incoming.send(Err(TransportError::Codec(e.to_string())));
                        break;
                    }
                }
            }
            tracing::debug!("websocket reader finished");
        });

        tokio::spawn(async move {
            while let Some(message) = outgoing.recv().await {
                let encoded = match encode_message(&message) {
                    Ok(data) => data,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to encode frame");
                        continue;
                    }
                };
                let text = String::from_utf8_lossy(&encoded).into_owned();
                if let Err(e) = sink.send(WsMessage::Text(text.into())).await {
                    tracing::warn!(error = %e, "websocket send failed");
                    return;
                }
            }
            let _ = sink.close().await;
        });

        Self {
            tx: Mutex::new(Some(tx)),
            rx: AsyncMutex::new(rx),
        }
    }
}

#[async_trait]
impl DbusTransport for WebSocketTransport {
    async fn send(&self, msg: Message) -> Result<(), TransportError> {
        let guard = self.tx.lock();
        let tx = guard.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(msg).map_err(|_| TransportError::ConnectionClosed)
    }

    async fn recv(&self) -> Result<Option<Message>, TransportError> {
        match self.rx.lock().await.recv().await {
            Some(Ok(msg)) => Ok(Some(msg)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        // dropping the sender lets the writer flush and send a close frame
        self.tx.lock().take();
        Ok(())
    }
}

/// Connects to a bridge's WebSocket endpoint.
pub struct WebSocketClient {
    url: String,
}

impl WebSocketClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn connect(&self) -> Result<WebSocketTransport, TransportError> {
        let (stream, _) = tokio_tungstenite::connect_async(&self.url)
            .await
            .map_err(|e| TransportError::Protocol(format!("Failed to connect: {}", e)))?;
        tracing::info!(url = %self.url, "connected to bridge");
        Ok(WebSocketTransport::new(stream))
    }
}
