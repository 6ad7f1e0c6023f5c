use crate::bus::Bus;
use async_trait::async_trait;
use cockpit_dbus_core::{DbusError, InterfaceInfo, Properties};
use serde_json::Value;
use std::sync::Arc;

/// An interface implementation exported on the bus.
///
/// Property values live on the bus; implementations read and change them
/// through the [`MethodContext`] so every change reaches the watchers.
#[async_trait]
pub trait DbusInterface: Send + Sync {
    /// Interface name, e.g. `com.redhat.Cockpit.DBusTests.Frobber`.
    fn name(&self) -> &str;

    fn info(&self) -> InterfaceInfo;

    async fn call(
        &self,
        ctx: &MethodContext,
        member: &str,
        args: Vec<Value>,
    ) -> Result<Vec<Value>, DbusError>;
}

/// What a method may touch while it runs. Every effect is delivered to
/// the connected sessions immediately, ahead of the method's reply.
pub struct MethodContext {
    bus: Arc<Bus>,
    path: String,
    interface: String,
    sender: String,
}

impl MethodContext {
    pub(crate) fn new(bus: Arc<Bus>, path: &str, interface: &str, sender: &str) -> Self {
        MethodContext {
            bus,
            path: path.to_string(),
            interface: interface.to_string(),
            sender: sender.to_string(),
        }
    }

    /// Object path the method was called on.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Unique name of the calling connection.
    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn bus(&self) -> &Arc<Bus> {
        &self.bus
    }

    /// A property of the called interface on the called object.
    pub fn property(&self, name: &str) -> Option<Value> {
        self.bus.property(&self.path, &self.interface, name)
    }

    pub fn set_property(&self, name: &str, value: Value) -> Result<(), DbusError> {
        self.bus.set_property(&self.path, &self.interface, name, value)
    }

    /// Emit a signal of the called interface from the called object.
    pub fn emit_signal(&self, member: &str, args: Vec<Value>) {
        self.bus.emit_signal(&self.path, &self.interface, member, args)
    }

    pub fn add_interface(
        &self,
        path: &str,
        iface: Arc<dyn DbusInterface>,
        props: Properties,
    ) -> Result<(), DbusError> {
        self.bus.export(path, iface, props)
    }

    pub fn remove_interface(&self, path: &str, iface: &str) -> bool {
        self.bus.unexport(path, iface)
    }

    pub fn remove_object(&self, path: &str) -> bool {
        self.bus.remove_object(path)
    }
}

impl std::fmt::Debug for MethodContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodContext")
            .field("path", &self.path)
            .field("interface", &self.interface)
            .field("sender", &self.sender)
            .finish()
    }
}
