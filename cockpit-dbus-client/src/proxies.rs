//! Every object under a namespace that implements one interface.

use crate::client::{CacheListener, Client, Subscription, Watch};
use crate::proxy::{wait_ready, Proxy, ReadySender};
use cockpit_dbus_core::names::{is_interface, is_object_path, path_in_namespace};
use cockpit_dbus_core::{DbusError, MatchRule, NotifyDiff, WatchSelector};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, watch};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum ProxySetEvent {
    /// A new object appeared; always immediately followed by `Changed`.
    Added(Proxy),
    Changed(Proxy),
    /// The object stopped implementing the interface; the proxy is invalid.
    Removed(Proxy),
}

struct ProxySetShared {
    client: Client,
    iface: String,
    namespace: String,
    members: RwLock<BTreeMap<String, Proxy>>,
    events: broadcast::Sender<ProxySetEvent>,
    ready: ReadySender,
    watch: Mutex<Option<Watch>>,
    subscription: Mutex<Option<Subscription>>,
}

impl CacheListener for ProxySetShared {
    fn on_notify(&self, diff: &NotifyDiff) {
        let mut events = Vec::new();
        for (path, iface, props) in diff.iter() {
            if iface != self.iface || !path_in_namespace(path, &self.namespace) {
                continue;
            }
            match props {
                Some(props) => {
                    let existing = self.members.read().get(path).cloned();
                    match existing {
                        Some(proxy) => {
                            if proxy.shared.apply(props) {
                                events.push(ProxySetEvent::Changed(proxy));
                            }
                        }
                        None => {
                            debug!(path, iface, "proxy added");
                            let proxy =
                                Proxy::member(&self.client, path, iface, self.ready.clone());
                            proxy.shared.apply(props);
                            self.members.write().insert(path.to_string(), proxy.clone());
                            events.push(ProxySetEvent::Added(proxy.clone()));
                            events.push(ProxySetEvent::Changed(proxy));
                        }
                    }
                }
                None => {
                    let removed = self.members.write().remove(path);
                    if let Some(proxy) = removed {
                        debug!(path, iface, "proxy removed");
                        proxy.shared.invalidate();
                        events.push(ProxySetEvent::Removed(proxy));
                    }
                }
            }
        }
        for event in events {
            let _ = self.events.send(event);
        }
    }
}

impl Drop for ProxySetShared {
    fn drop(&mut self) {
        if let Some(watch) = self.watch.get_mut().take() {
            watch.remove();
        }
        if let Some(sub) = self.subscription.get_mut().take() {
            sub.remove();
        }
    }
}

/// Proxies for all current and future implementers of an interface.
#[derive(Clone)]
pub struct ProxySet {
    shared: Arc<ProxySetShared>,
}

impl ProxySet {
    pub fn iface(&self) -> &str {
        &self.shared.iface
    }

    pub fn namespace(&self) -> &str {
        &self.shared.namespace
    }

    pub async fn wait(&self) -> Result<(), DbusError> {
        wait_ready(&self.shared.ready, &self.shared.client).await
    }

    pub fn events(&self) -> broadcast::Receiver<ProxySetEvent> {
        self.shared.events.subscribe()
    }

    pub fn get(&self, path: &str) -> Option<Proxy> {
        self.shared.members.read().get(path).cloned()
    }

    /// Currently valid proxies keyed by path.
    pub fn snapshot(&self) -> BTreeMap<String, Proxy> {
        self.shared
            .members
            .read()
            .iter()
            .filter(|(_, proxy)| proxy.valid())
            .map(|(path, proxy)| (path.clone(), proxy.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.shared.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.members.read().is_empty()
    }
}

impl std::fmt::Debug for ProxySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxySet")
            .field("iface", &self.shared.iface)
            .field("namespace", &self.shared.namespace)
            .field("members", &self.len())
            .finish()
    }
}

impl Client {
    /// Track every object under `namespace` implementing `iface`.
    pub fn proxies(&self, iface: &str, namespace: &str) -> Result<ProxySet, DbusError> {
        if !is_interface(iface) {
            return Err(DbusError::protocol(format!("interface name is invalid: {}", iface)));
        }
        if !is_object_path(namespace) {
            return Err(DbusError::protocol(format!("object path is invalid: {}", namespace)));
        }

        let ready: ReadySender = Arc::new(watch::channel(None).0);
        let shared = Arc::new(ProxySetShared {
            client: self.clone(),
            iface: iface.to_string(),
            namespace: namespace.to_string(),
            members: RwLock::new(BTreeMap::new()),
            events: broadcast::channel(self.inner.config.event_capacity.max(1)).0,
            ready: ready.clone(),
            watch: Mutex::new(None),
            subscription: Mutex::new(None),
        });

        let weak = Arc::downgrade(&shared);
        let listener: Weak<dyn CacheListener> = weak;
        self.add_listener(listener, |_| {});

        let target = Arc::downgrade(&shared);
        let subscription = self.subscribe(
            MatchRule::new().path_namespace(namespace).interface(iface),
            move |signal| {
                let Some(set) = target.upgrade() else {
                    return;
                };
                let member = set.members.read().get(&signal.path).cloned();
                if let Some(proxy) = member {
                    proxy.shared.deliver_signal(signal);
                }
            },
        );
        *shared.subscription.lock() = subscription.ok();

        let watch = self.start_watch(
            WatchSelector::namespace(namespace).interface(iface),
            move |outcome| {
                ready.send_replace(Some(outcome));
            },
        );
        *shared.watch.lock() = watch.ok();

        Ok(ProxySet { shared })
    }
}
