//! One open client per `(bus name, options)`.

use crate::client::Client;
use crate::config::{ClientConfig, DbusOptions};
use async_trait::async_trait;
use cockpit_dbus_core::{DbusError, Problem};
use cockpit_dbus_transport::{DbusTransport, TransportError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};

/// Opens a fresh transport to the bridge.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn DbusTransport>, TransportError>;
}

/// Connects over WebSocket to a bridge `/dbus` endpoint.
#[cfg(feature = "websocket")]
pub struct WebSocketConnector {
    url: String,
}

#[cfg(feature = "websocket")]
impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[cfg(feature = "websocket")]
#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Box<dyn DbusTransport>, TransportError> {
        let transport = cockpit_dbus_transport::WebSocketClient::new(&self.url)
            .connect()
            .await?;
        Ok(Box::new(transport))
    }
}

type ClientKey = (Option<String>, DbusOptions);

/// Hands out clients, reusing an open one for the same name and options.
pub struct DbusFactory<C: Connector> {
    connector: C,
    config: ClientConfig,
    clients: DashMap<ClientKey, Client>,
}

impl<C: Connector> DbusFactory<C> {
    pub fn new(connector: C) -> Self {
        Self::with_config(connector, ClientConfig::default())
    }

    pub fn with_config(connector: C, config: ClientConfig) -> Self {
        DbusFactory {
            connector,
            config,
            clients: DashMap::new(),
        }
    }

    /// The open client for `(name, options)`, connecting if there is none.
    /// A closed client is never returned; a new one replaces it.
    pub async fn dbus(
        &self,
        name: Option<&str>,
        options: DbusOptions,
    ) -> Result<Client, DbusError> {
        let key: ClientKey = (name.map(str::to_string), options.clone());
        if let Some(client) = self.clients.get(&key) {
            if !client.is_closed() {
                debug!(name = ?name, "reusing client");
                return Ok(client.clone());
            }
        }

        let transport = self
            .connector
            .connect()
            .await
            .map_err(|e| DbusError::problem(Problem::Disconnected, e.to_string()))?;

        // another caller may have connected while we were waiting
        let client = match self.clients.entry(key) {
            Entry::Occupied(entry) if !entry.get().is_closed() => entry.get().clone(),
            Entry::Occupied(mut entry) => {
                let client = Client::with_config(transport, name, options, self.config.clone());
                entry.insert(client.clone());
                client
            }
            Entry::Vacant(entry) => entry
                .insert(Client::with_config(transport, name, options, self.config.clone()))
                .clone(),
        };
        info!(name = ?name, "client opened");
        Ok(client)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Forget clients that have closed.
    pub fn prune(&self) {
        self.clients.retain(|_, client| !client.is_closed());
    }
}
