pub mod codec;
pub mod framed;
pub mod memory;
pub mod transport;
#[cfg(feature = "websocket")]
pub mod websocket;

pub use codec::{CodecError, LengthPrefixedCodec, NewlineDelimitedCodec};
pub use framed::FramedTransport;
pub use memory::MemoryTransport;
pub use transport::{DbusTransport, TransportError};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketClient, WebSocketTransport};
