pub mod cache;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod factory;
pub mod proxies;
pub mod proxy;
mod router;

pub use cache::{Interfaces, ObjectCache};
pub use client::{Client, ReadyInfo, Subscription, Watch};
pub use config::{ClientConfig, DbusOptions};
pub use dispatch::{CallState, PendingCall, Reply, ReplyOptions};
#[cfg(feature = "websocket")]
pub use factory::WebSocketConnector;
pub use factory::{Connector, DbusFactory};
pub use proxies::{ProxySet, ProxySetEvent};
pub use proxy::{MethodHandle, Proxy, ProxyEvent};

pub use cockpit_dbus_core::{
    CallOptions, DbusError, MatchRule, MetaData, NotifyDiff, Problem, Properties, SignalMessage,
    WatchSelector,
};
