//! The in-process bus: owned names, the object tree and connected sessions.
//!
//! Every change to the tree is delivered to the sessions while the tree
//! is still locked, so all sessions see changes in the same order and a
//! watch snapshot can never miss or repeat a change.

use crate::builtin;
use crate::config::BridgeConfig;
use crate::object::{DbusInterface, MethodContext};
use crate::session::{self, SessionShared};
use cockpit_dbus_core::error::names as errors;
use cockpit_dbus_core::marshal::check_args;
use cockpit_dbus_core::names::{is_bus_name, is_object_path, path_in_namespace};
use cockpit_dbus_core::{
    DbusError, InterfaceInfo, NotifyDiff, Properties, Signature, SignalMessage, WatchSelector,
};
use cockpit_dbus_transport::{DbusTransport, MemoryTransport};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

struct ObjectEntry {
    imp: Arc<dyn DbusInterface>,
    props: Properties,
}

type ObjectTree = BTreeMap<String, BTreeMap<String, ObjectEntry>>;

pub struct Bus {
    allow_superuser: bool,
    objects: RwLock<ObjectTree>,
    interfaces: DashMap<String, InterfaceInfo>,
    names: DashMap<String, String>,
    sessions: DashMap<Uuid, Arc<SessionShared>>,
    next_unique: AtomicU64,
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("objects", &self.objects.read().len())
            .field("names", &self.names.len())
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

impl Bus {
    pub fn new() -> Arc<Self> {
        Self::with_config(&BridgeConfig::default())
    }

    pub fn with_config(config: &BridgeConfig) -> Arc<Self> {
        Arc::new(Bus {
            allow_superuser: config.allow_superuser,
            objects: RwLock::new(BTreeMap::new()),
            interfaces: DashMap::new(),
            names: DashMap::new(),
            sessions: DashMap::new(),
            next_unique: AtomicU64::new(1),
        })
    }

    pub fn allow_superuser(&self) -> bool {
        self.allow_superuser
    }

    /// A fresh `:1.N` connection name.
    pub fn allocate_unique_name(&self) -> String {
        format!(":1.{}", self.next_unique.fetch_add(1, Ordering::Relaxed))
    }

    pub fn request_name(&self, name: &str, owner: &str) -> Result<(), DbusError> {
        if !is_bus_name(name) || name.starts_with(':') {
            return Err(DbusError::invalid_args(format!("Invalid bus name '{}'", name)));
        }
        self.names.insert(name.to_string(), owner.to_string());
        info!(name, owner, "name acquired");
        for session in self.session_list() {
            session.owner_changed(name, Some(owner));
        }
        Ok(())
    }

    /// Drop ownership of `name`. Sessions tracking it are closed.
    pub fn release_name(&self, name: &str) -> bool {
        if self.names.remove(name).is_none() {
            return false;
        }
        info!(name, "name released");
        for session in self.session_list() {
            session.owner_changed(name, None);
        }
        true
    }

    pub fn owner_of(&self, name: &str) -> Option<String> {
        self.names.get(name).map(|owner| owner.value().clone())
    }

    /// Export `iface` at `path` with initial property values.
    pub fn export(
        &self,
        path: &str,
        iface: Arc<dyn DbusInterface>,
        props: Properties,
    ) -> Result<(), DbusError> {
        if !is_object_path(path) {
            return Err(DbusError::invalid_args(format!("Invalid object path '{}'", path)));
        }
        let name = iface.name().to_string();
        self.interfaces
            .entry(name.clone())
            .or_insert_with(|| iface.info());

        let mut tree = self.objects.write();
        let ifaces = tree.entry(path.to_string()).or_default();
        if ifaces.contains_key(&name) {
            return Err(DbusError::remote(
                errors::FAILED,
                format!("An object is already exported for the interface {} at {}", name, path),
            ));
        }
        ifaces.insert(
            name.clone(),
            ObjectEntry {
                imp: iface,
                props: props.clone(),
            },
        );
        debug!(path, iface = %name, "interface exported");

        let mut diff = NotifyDiff::new();
        diff.set_properties(path, &name, props);
        self.publish_notify(&diff);
        Ok(())
    }

    pub fn unexport(&self, path: &str, iface: &str) -> bool {
        let mut tree = self.objects.write();
        let Some(ifaces) = tree.get_mut(path) else {
            return false;
        };
        if ifaces.remove(iface).is_none() {
            return false;
        }
        if ifaces.is_empty() {
            tree.remove(path);
        }
        debug!(path, iface, "interface removed");

        let mut diff = NotifyDiff::new();
        diff.remove_interface(path, iface);
        self.publish_notify(&diff);
        true
    }

    pub fn remove_object(&self, path: &str) -> bool {
        let mut tree = self.objects.write();
        let Some(ifaces) = tree.remove(path) else {
            return false;
        };
        debug!(path, "object removed");

        let mut diff = NotifyDiff::new();
        for iface in ifaces.keys() {
            diff.remove_interface(path, iface);
        }
        self.publish_notify(&diff);
        true
    }

    pub fn has_object(&self, path: &str) -> bool {
        self.objects.read().contains_key(path)
    }

    pub fn object_paths(&self) -> Vec<String> {
        self.objects.read().keys().cloned().collect()
    }

    pub fn interface_info(&self, iface: &str) -> Option<InterfaceInfo> {
        self.interfaces.get(iface).map(|info| info.value().clone())
    }

    pub fn property(&self, path: &str, iface: &str, name: &str) -> Option<Value> {
        self.objects
            .read()
            .get(path)
            .and_then(|ifaces| ifaces.get(iface))
            .and_then(|entry| entry.props.get(name).cloned())
    }

    pub fn properties(&self, path: &str, iface: &str) -> Option<Properties> {
        self.objects
            .read()
            .get(path)
            .and_then(|ifaces| ifaces.get(iface))
            .map(|entry| entry.props.clone())
    }

    /// Change a property, notifying watchers and emitting `PropertiesChanged`.
    /// Setting a property to its current value does nothing.
    pub fn set_property(
        &self,
        path: &str,
        iface: &str,
        name: &str,
        value: Value,
    ) -> Result<(), DbusError> {
        let signature = self
            .interface_info(iface)
            .and_then(|info| info.properties.get(name).map(|p| p.signature.clone()))
            .ok_or_else(|| DbusError::invalid_args(format!("No such property '{}'", name)))?;

        let mut tree = self.objects.write();
        let entry = tree
            .get_mut(path)
            .and_then(|ifaces| ifaces.get_mut(iface))
            .ok_or_else(|| {
                DbusError::invalid_args(format!(
                    "No such interface '{}' on object at path {}",
                    iface, path
                ))
            })?;
        if entry.props.get(name) == Some(&value) {
            return Ok(());
        }
        entry.props.insert(name.to_string(), value.clone());

        let mut diff = NotifyDiff::new();
        diff.set_property(path, iface, name, value.clone());
        self.publish_notify(&diff);

        let mut changed = serde_json::Map::new();
        changed.insert(name.to_string(), json!({ "t": signature, "v": value }));
        self.publish_signal(&SignalMessage {
            path: path.to_string(),
            interface: builtin::PROPERTIES.to_string(),
            member: "PropertiesChanged".to_string(),
            args: vec![json!(iface), Value::Object(changed), json!([])],
        });
        Ok(())
    }

    pub fn emit_signal(&self, path: &str, iface: &str, member: &str, args: Vec<Value>) {
        let _tree = self.objects.read();
        self.publish_signal(&SignalMessage {
            path: path.to_string(),
            interface: iface.to_string(),
            member: member.to_string(),
            args,
        });
    }

    /// Run `f` with the current contents under `selector`; the tree stays
    /// locked until `f` returns.
    pub(crate) fn snapshot<R>(
        &self,
        selector: &WatchSelector,
        f: impl FnOnce(NotifyDiff) -> R,
    ) -> R {
        let tree = self.objects.read();
        let mut diff = NotifyDiff::new();
        for (path, ifaces) in tree.iter() {
            if !selector.covers_path(path) {
                continue;
            }
            for (iface, entry) in ifaces {
                if selector.covers(path, iface) {
                    diff.set_properties(path, iface, entry.props.clone());
                }
            }
        }
        f(diff)
    }

    /// Paths under `namespace`, deepest first.
    pub fn paths_under(&self, namespace: &str) -> Vec<String> {
        let mut paths: Vec<String> = self
            .objects
            .read()
            .keys()
            .filter(|p| path_in_namespace(p, namespace))
            .cloned()
            .collect();
        paths.reverse();
        paths
    }

    /// Dispatch a method call. Returns the reply arguments and their signature.
    pub async fn call(
        self: &Arc<Self>,
        sender: &str,
        path: &str,
        iface: &str,
        member: &str,
        args: Vec<Value>,
        signature: Option<&str>,
    ) -> Result<(Vec<Value>, String), DbusError> {
        if iface == builtin::PROPERTIES {
            return builtin::call(self, path, member, args, signature);
        }

        let imp = self
            .objects
            .read()
            .get(path)
            .and_then(|ifaces| ifaces.get(iface))
            .map(|entry| entry.imp.clone())
            .ok_or_else(|| {
                DbusError::unknown_method(format!(
                    "No such interface '{}' on object at path {}",
                    iface, path
                ))
            })?;
        let method = self
            .interface_info(iface)
            .and_then(|info| info.methods.get(member).cloned())
            .ok_or_else(|| {
                DbusError::unknown_method(format!(
                    "No such method '{}' in interface '{}' at object path '{}'",
                    member, iface, path
                ))
            })?;

        let expected = method
            .in_signature()
            .map_err(|e| DbusError::remote(errors::FAILED, e.to_string()))?;
        check_signature(&expected, signature)?;
        check_args(&expected, &args)?;

        debug!(path, iface, member, sender, "dispatching call");
        let ctx = MethodContext::new(self.clone(), path, iface, sender);
        let reply = imp.call(&ctx, member, args).await?;
        Ok((reply, method.out_args.concat()))
    }

    /// Attach a session to `transport` and serve it until it closes.
    pub fn serve<T>(self: &Arc<Self>, transport: T) -> JoinHandle<()>
    where
        T: DbusTransport + 'static,
    {
        tokio::spawn(session::run(self.clone(), transport))
    }

    /// An in-memory connection to this bus.
    pub fn connect(self: &Arc<Self>) -> MemoryTransport {
        let (near, far) = MemoryTransport::pair();
        self.serve(far);
        near
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub(crate) fn add_session(&self, session: Arc<SessionShared>) {
        self.sessions.insert(session.id(), session);
    }

    pub(crate) fn remove_session(&self, id: Uuid) {
        self.sessions.remove(&id);
    }

    fn session_list(&self) -> Vec<Arc<SessionShared>> {
        self.sessions.iter().map(|s| s.value().clone()).collect()
    }

    fn publish_notify(&self, diff: &NotifyDiff) {
        for session in self.session_list() {
            session.deliver_notify(diff, self);
        }
    }

    fn publish_signal(&self, signal: &SignalMessage) {
        for session in self.session_list() {
            session.deliver_signal(signal);
        }
    }
}

/// A `type` given with a call must equal the method's input signature.
pub(crate) fn check_signature(expected: &Signature, given: Option<&str>) -> Result<(), DbusError> {
    let Some(given) = given else {
        return Ok(());
    };
    let parsed = Signature::parse(given)
        .map_err(|e| DbusError::invalid_args(format!("Invalid signature '{}': {}", given, e)))?;
    if &parsed != expected {
        return Err(DbusError::invalid_args(format!(
            "Type of message, '({})', does not match expected type '({})'",
            parsed, expected
        )));
    }
    Ok(())
}
