//! The client side object cache: `path -> interface -> properties`.

use cockpit_dbus_core::names::path_in_namespace;
use cockpit_dbus_core::{NotifyDiff, Properties};
use std::collections::BTreeMap;

pub type Interfaces = BTreeMap<String, Properties>;

#[derive(Debug, Clone, Default)]
pub struct ObjectCache {
    paths: BTreeMap<String, Interfaces>,
}

impl ObjectCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a diff. Updated properties are merged into what is cached,
    /// a `null` interface entry deletes the interface, and paths left with
    /// no interfaces are dropped.
    pub fn apply(&mut self, diff: &NotifyDiff) {
        for (path, iface, props) in diff.iter() {
            match props {
                Some(props) => {
                    self.paths
                        .entry(path.to_string())
                        .or_default()
                        .entry(iface.to_string())
                        .or_default()
                        .extend(props.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                None => {
                    if let Some(ifaces) = self.paths.get_mut(path) {
                        ifaces.remove(iface);
                        if ifaces.is_empty() {
                            self.paths.remove(path);
                        }
                    }
                }
            }
        }
    }

    pub fn get(&self, path: &str, iface: &str) -> Option<&Properties> {
        self.paths.get(path).and_then(|ifaces| ifaces.get(iface))
    }

    pub fn interfaces(&self, path: &str) -> Option<&Interfaces> {
        self.paths.get(path)
    }

    /// Paths under `namespace` that carry `iface`.
    pub fn paths_with(&self, iface: &str, namespace: &str) -> Vec<String> {
        self.paths
            .iter()
            .filter(|(path, ifaces)| {
                path_in_namespace(path, namespace) && ifaces.contains_key(iface)
            })
            .map(|(path, _)| path.clone())
            .collect()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.paths.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}
