pub mod builtin;
pub mod bus;
pub mod config;
pub mod error;
pub mod logging;
pub mod object;
pub mod server;
mod session;
pub mod test_service;

pub use bus::Bus;
pub use config::BridgeConfig;
pub use error::BridgeError;
pub use logging::{init_logging, init_test_logging};
pub use object::{DbusInterface, MethodContext};
pub use server::{router, serve};
