use crate::bus::Bus;
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use cockpit_dbus_core::{decode_message, encode_message, Message};
use cockpit_dbus_transport::{DbusTransport, TransportError};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

/// A server-side WebSocket carrying one JSON frame per text message.
struct AxumWsTransport {
    tx: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    rx: AsyncMutex<mpsc::UnboundedReceiver<Result<Message, TransportError>>>,
}

impl AxumWsTransport {
    fn new(socket: WebSocket) -> Self {
        let (mut sink, mut source) = socket.split();
        let (tx, mut outgoing) = mpsc::unbounded_channel::<Message>();
        let (incoming, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(item) = source.next().await {
                let decoded = match item {
                    Ok(WsMessage::Text(text)) => decode_message(text.as_str().as_bytes()),
                    Ok(WsMessage::Binary(data)) => decode_message(&data),
                    Ok(WsMessage::Close(frame)) => {
                        debug!(?frame, "websocket closing");
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(error = %e, "websocket receive failed");
                        break;
                    }
                };
                let forwarded = match decoded {
                    Ok(message) => incoming.send(Ok(message)),
                    Err(e) => incoming.send(Err(TransportError::Codec(e.to_string()))),
                };
                if forwarded.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            while let Some(message) = outgoing.recv().await {
                let encoded = match encode_message(&message) {
                    Ok(data) => data,
                    Err(e) => {
                        warn!(error = %e, "failed to encode frame");
                        continue;
                    }
                };
                let text = String::from_utf8_lossy(&encoded).into_owned();
                if let Err(e) = sink.send(WsMessage::Text(text.into())).await {
                    warn!(error = %e, "websocket send failed");
                    return;
                }
            }
            let _ = sink.close().await;
        });

        AxumWsTransport {
            tx: Mutex::new(Some(tx)),
            rx: AsyncMutex::new(rx),
        }
    }
}

#[async_trait]
impl DbusTransport for AxumWsTransport {
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
        self.tx.lock().take();
        Ok(())
    }
}

async fn websocket_handler(ws: WebSocketUpgrade, State(bus): State<Arc<Bus>>) -> Response {
    ws.on_upgrade(move |socket| async move {
        info!("WebSocket connection established");
        let session = bus.serve(AxumWsTransport::new(socket));
        if let Err(e) = session.await {
            warn!(error = %e, "session task failed");
        }
    })
}

async fn health_handler(State(bus): State<Arc<Bus>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "sessions": bus.session_count(),
        "objects": bus.object_paths().len(),
    }))
}

/// Routes served by the bridge: `/dbus` (WebSocket) and `/health`.
pub fn router(bus: Arc<Bus>) -> Router {
    Router::new()
        .route("/dbus", get(websocket_handler))
        .route("/health", get(health_handler))
        .with_state(bus)
}

/// Serve `bus` on an already bound listener.
pub async fn serve(listener: TcpListener, bus: Arc<Bus>) -> Result<(), BridgeError> {
    let addr = listener.local_addr()?;
    info!(%addr, "bridge listening");
    info!("  WebSocket endpoint: ws://{}/dbus", addr);
    info!("  Health endpoint: http://{}/health", addr);
    axum::serve(listener, router(bus)).await?;
    Ok(())
}

/// Bind to the configured address and serve until the process exits.
pub async fn run(config: &BridgeConfig, bus: Arc<Bus>) -> Result<(), BridgeError> {
    let listener = TcpListener::bind(config.addr()).await?;
    serve(listener, bus).await
}
