//! Live mirror of one interface on one object.

use crate::client::{CacheListener, Client, Subscription, Watch};
use crate::dispatch::Reply;
use cockpit_dbus_core::names::{is_interface, is_object_path};
use cockpit_dbus_core::{
    CallOptions, DbusError, MatchRule, MethodInfo, NotifyDiff, Problem, Properties, SignalMessage,
    WatchSelector,
};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, watch};
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq)]
pub enum ProxyEvent {
    /// Properties that changed, with their new values.
    Changed(Properties),
    Signal { name: String, args: Vec<Value> },
}

/// Outcome of the backing watch; `None` while it is in flight.
pub(crate) type ReadySender = Arc<watch::Sender<Option<Result<(), DbusError>>>>;

pub(crate) async fn wait_ready(
    ready: &ReadySender,
    client: &Client,
) -> Result<(), DbusError> {
    let mut rx = ready.subscribe();
    tokio::select! {
        biased;
        outcome = rx.wait_for(Option::is_some) => match outcome {
            Ok(outcome) => outcome.clone().unwrap_or(Ok(())),
            Err(_) => Err(DbusError::closed(Problem::Disconnected)),
        },
        err = client.closed() => Err(err),
    }
}

#[derive(Debug, Default)]
struct ProxyState {
    valid: bool,
    removed: bool,
    props: Properties,
}

pub(crate) struct ProxyShared {
    client: Client,
    path: String,
    iface: String,
    state: RwLock<ProxyState>,
    events: broadcast::Sender<ProxyEvent>,
    ready: ReadySender,
    watch: Mutex<Option<Watch>>,
    subscription: Mutex<Option<Subscription>>,
}

impl ProxyShared {
    fn new(client: &Client, path: &str, iface: &str, ready: ReadySender) -> Self {
        ProxyShared {
            client: client.clone(),
            path: path.to_string(),
            iface: iface.to_string(),
            state: RwLock::new(ProxyState::default()),
            events: broadcast::channel(client.inner.config.event_capacity.max(1)).0,
            ready,
            watch: Mutex::new(None),
            subscription: Mutex::new(None),
        }
    }

    /// Merge `props`; returns false once the proxy has been invalidated.
    pub(crate) fn apply(&self, props: &Properties) -> bool {
        {
            let mut state = self.state.write();
            if state.removed {
                return false;
            }
            state.valid = true;
            state
                .props
                .extend(props.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        let _ = self.events.send(ProxyEvent::Changed(props.clone()));
        true
    }

    /// The interface vanished. Returns true the first time.
    pub(crate) fn invalidate(&self) -> bool {
        let mut state = self.state.write();
        if state.removed {
            return false;
        }
        debug!(path = %self.path, iface = %self.iface, "proxy invalidated");
        state.removed = true;
        state.valid = false;
        true
    }

    pub(crate) fn deliver_signal(&self, signal: &SignalMessage) {
        trace!(path = %self.path, member = %signal.member, "proxy signal");
        let _ = self.events.send(ProxyEvent::Signal {
            name: signal.member.clone(),
            args: signal.args.clone(),
        });
    }
}

impl CacheListener for ProxyShared {
    fn on_notify(&self, diff: &NotifyDiff) {
        match diff.get(&self.path, &self.iface) {
            Some(Some(props)) => {
                self.apply(props);
            }
            Some(None) => {
                self.invalidate();
            }
            None => {}
        }
    }
}

impl Drop for ProxyShared {
    fn drop(&mut self) {
        if let Some(watch) = self.watch.get_mut().take() {
            watch.remove();
        }
        if let Some(sub) = self.subscription.get_mut().take() {
            sub.remove();
        }
    }
}

/// A proxy for `iface` at `path`. Clones share state.
#[derive(Clone)]
pub struct Proxy {
    pub(crate) shared: Arc<ProxyShared>,
}

impl Proxy {
    /// A proxy driven by its owning set rather than by its own watch.
    pub(crate) fn member(client: &Client, path: &str, iface: &str, ready: ReadySender) -> Self {
        Proxy {
            shared: Arc::new(ProxyShared::new(client, path, iface, ready)),
        }
    }

    pub fn path(&self) -> &str {
        &self.shared.path
    }

    pub fn iface(&self) -> &str {
        &self.shared.iface
    }

    pub fn client(&self) -> &Client {
        &self.shared.client
    }

    /// Wait until the initial contents of the object have been loaded.
    pub async fn wait(&self) -> Result<(), DbusError> {
        wait_ready(&self.shared.ready, &self.shared.client).await
    }

    /// True while the object currently implements the interface.
    pub fn valid(&self) -> bool {
        self.shared.state.read().valid
    }

    pub fn get(&self, prop: &str) -> Option<Value> {
        self.shared.state.read().props.get(prop).cloned()
    }

    pub fn properties(&self) -> Properties {
        self.shared.state.read().props.clone()
    }

    pub fn events(&self) -> broadcast::Receiver<ProxyEvent> {
        self.shared.events.subscribe()
    }

    /// Call `method` on this object; works before `wait()` completes.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Reply, DbusError> {
        self.shared
            .client
            .call(
                &self.shared.path,
                &self.shared.iface,
                method,
                args,
                CallOptions::default(),
            )
            .await
    }

    /// Typed entry point for a method listed in the interface metadata.
    pub fn method(&self, name: &str) -> Option<MethodHandle> {
        let info = self.shared.client.interface_info(&self.shared.iface)?;
        let method = info.methods.get(name)?.clone();
        Some(MethodHandle {
            proxy: self.clone(),
            name: name.to_string(),
            info: method,
        })
    }

    /// Method names known from metadata.
    pub fn methods(&self) -> Vec<String> {
        self.shared
            .client
            .interface_info(&self.shared.iface)
            .map(|info| info.methods.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("path", &self.shared.path)
            .field("iface", &self.shared.iface)
            .field("valid", &self.valid())
            .finish()
    }
}

impl PartialEq for Proxy {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

/// A method resolved from interface metadata; calls carry its in-signature.
#[derive(Debug, Clone)]
pub struct MethodHandle {
    proxy: Proxy,
    name: String,
    info: MethodInfo,
}

impl MethodHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn info(&self) -> &MethodInfo {
        &self.info
    }

    pub async fn call(&self, args: Vec<Value>) -> Result<Reply, DbusError> {
        let shared = &self.proxy.shared;
        shared
            .client
            .call(
                &shared.path,
                &shared.iface,
                &self.name,
                args,
                CallOptions::with_signature(self.info.in_args.concat()),
            )
            .await
    }
}

impl Client {
    /// A proxy for `iface` at `path` with its own watch and signal subscription.
    ///
    /// Whatever the cache already holds for the object is loaded straight away.
    pub fn proxy(&self, iface: &str, path: &str) -> Result<Proxy, DbusError> {
        if !is_object_path(path) {
            return Err(DbusError::protocol(format!("object path is invalid: {}", path)));
        }
        if !is_interface(iface) {
            return Err(DbusError::protocol(format!("interface name is invalid: {}", iface)));
        }

        let ready: ReadySender = Arc::new(watch::channel(None).0);
        let shared = Arc::new(ProxyShared::new(self, path, iface, ready.clone()));
        let weak = Arc::downgrade(&shared);
        let listener: Weak<dyn CacheListener> = weak;
        self.add_listener(listener, |cache| {
            if let Some(props) = cache.get(path, iface) {
                let mut state = shared.state.write();
                state.valid = true;
                state.props = props.clone();
            }
        });

        let target = Arc::downgrade(&shared);
        let rule = MatchRule::new().path(path).interface(iface);
        let subscription = self.subscribe(rule, move |signal| {
            if let Some(proxy) = target.upgrade() {
                proxy.deliver_signal(signal);
            }
        });
        *shared.subscription.lock() = subscription.ok();

        let watch = self.start_watch(WatchSelector::path(path).interface(iface), move |outcome| {
            ready.send_replace(Some(outcome));
        });
        *shared.watch.lock() = watch.ok();

        Ok(Proxy { shared })
    }
}
