//! Incremental object tree diffs, the payload of `notify` frames.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Property name to JSON encoded value.
pub type Properties = Map<String, Value>;

/// `path -> interface -> properties`, where `None` marks a removed interface.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotifyDiff {
    paths: BTreeMap<String, BTreeMap<String, Option<Properties>>>,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notify payload must be an object")]
    NotAnObject,
    #[error("interfaces of path '{0}' must be an object")]
    BadPath(String),
    #[error("properties of '{0}' at '{1}' must be an object or null")]
    BadInterface(String, String),
}

impl NotifyDiff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Merge `props` into the entry for `path`/`interface`.
    ///
    /// An earlier removal in the same diff is replaced by the new properties.
    pub fn set_properties(&mut self, path: &str, interface: &str, props: Properties) {
        let entry = self
            .paths
            .entry(path.to_string())
            .or_default()
            .entry(interface.to_string())
            .or_insert_with(|| Some(Properties::new()));
        match entry {
            Some(existing) => existing.extend(props),
            None => *entry = Some(props),
        }
    }

    pub fn set_property(&mut self, path: &str, interface: &str, name: &str, value: Value) {
        let mut props = Properties::new();
        props.insert(name.to_string(), value);
        self.set_properties(path, interface, props);
    }

    pub fn remove_interface(&mut self, path: &str, interface: &str) {
        self.paths
            .entry(path.to_string())
            .or_default()
            .insert(interface.to_string(), None);
    }

    /// Fold a later diff into this one.
    pub fn merge(&mut self, later: NotifyDiff) {
        for (path, interfaces) in later.paths {
            for (interface, props) in interfaces {
                match props {
                    Some(props) => self.set_properties(&path, &interface, props),
                    None => self.remove_interface(&path, &interface),
                }
            }
        }
    }

    /// `Some(None)` for a removal, `Some(Some(props))` for an update.
    pub fn get(&self, path: &str, interface: &str) -> Option<Option<&Properties>> {
        self.paths
            .get(path)
            .and_then(|ifaces| ifaces.get(interface))
            .map(Option::as_ref)
    }

    pub fn contains_path(&self, path: &str) -> bool {
        self.paths.contains_key(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, Option<&Properties>)> {
        self.paths.iter().flat_map(|(path, ifaces)| {
            ifaces
                .iter()
                .map(move |(iface, props)| (path.as_str(), iface.as_str(), props.as_ref()))
        })
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.paths.keys().map(String::as_str)
    }

    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        for (path, ifaces) in &self.paths {
            let mut entry = Map::new();
            for (iface, props) in ifaces {
                let value = match props {
                    Some(props) => Value::Object(props.clone()),
                    None => Value::Null,
                };
                entry.insert(iface.clone(), value);
            }
            out.insert(path.clone(), Value::Object(entry));
        }
        Value::Object(out)
    }

    pub fn from_json(value: &Value) -> Result<Self, NotifyError> {
        let paths = value.as_object().ok_or(NotifyError::NotAnObject)?;
        let mut diff = NotifyDiff::new();
        for (path, ifaces) in paths {
            let ifaces = ifaces
                .as_object()
                .ok_or_else(|| NotifyError::BadPath(path.clone()))?;
            let entry = diff.paths.entry(path.clone()).or_default();
            for (iface, props) in ifaces {
                let props = match props {
                    Value::Null => None,
                    Value::Object(props) => Some(props.clone()),
                    _ => return Err(NotifyError::BadInterface(iface.clone(), path.clone())),
                };
                entry.insert(iface.clone(), props);
            }
        }
        Ok(diff)
    }
}

impl Serialize for NotifyDiff {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for NotifyDiff {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        NotifyDiff::from_json(&value).map_err(|e| serde::de::Error::custom(e.to_string()))
    }
}
