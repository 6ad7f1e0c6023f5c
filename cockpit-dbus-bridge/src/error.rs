use cockpit_dbus_core::{DbusError, Problem};
use cockpit_dbus_transport::TransportError;
use thiserror::Error;

/// Why a session ended abnormally.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Problem code sent to the peer in the closing frame.
    pub fn problem(&self) -> Problem {
        match self {
            BridgeError::Protocol(_)
            | BridgeError::Transport(TransportError::Codec(_))
            | BridgeError::Transport(TransportError::Protocol(_)) => Problem::ProtocolError,
            BridgeError::AccessDenied(_) => Problem::AccessDenied,
            BridgeError::Transport(_) | BridgeError::Io(_) => Problem::Disconnected,
        }
    }
}

impl From<DbusError> for BridgeError {
    fn from(err: DbusError) -> Self {
        BridgeError::Protocol(err.message().to_string())
    }
}
