//! Interface descriptions exchanged in `meta` frames.

use crate::signature::{Signature, SignatureError};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MethodInfo {
    #[serde(rename = "in", default)]
    pub in_args: Vec<String>,
    #[serde(rename = "out", default)]
    pub out_args: Vec<String>,
}

impl MethodInfo {
    pub fn new<I, O>(in_args: I, out_args: O) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        MethodInfo {
            in_args: in_args.into_iter().map(Into::into).collect(),
            out_args: out_args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn in_signature(&self) -> Result<Signature, SignatureError> {
        Signature::parse(&self.in_args.concat())
    }

    pub fn out_signature(&self) -> Result<Signature, SignatureError> {
        Signature::parse(&self.out_args.concat())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyInfo {
    /// `r`, `w` or `rw`.
    pub flags: String,
    #[serde(rename = "type")]
    pub signature: String,
}

impl PropertyInfo {
    pub fn read_only(signature: impl Into<String>) -> Self {
        PropertyInfo {
            flags: "r".to_string(),
            signature: signature.into(),
        }
    }

    pub fn read_write(signature: impl Into<String>) -> Self {
        PropertyInfo {
            flags: "rw".to_string(),
            signature: signature.into(),
        }
    }

    pub fn readable(&self) -> bool {
        self.flags.contains('r')
    }

    pub fn writable(&self) -> bool {
        self.flags.contains('w')
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalInfo {
    #[serde(rename = "in", default)]
    pub args: Vec<String>,
}

/// Methods, properties and signals of one interface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterfaceInfo {
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub methods: IndexMap<String, MethodInfo>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub properties: IndexMap<String, PropertyInfo>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub signals: IndexMap<String, SignalInfo>,
}

impl InterfaceInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, name: impl Into<String>, info: MethodInfo) -> Self {
        self.methods.insert(name.into(), info);
        self
    }

    pub fn property(mut self, name: impl Into<String>, info: PropertyInfo) -> Self {
        self.properties.insert(name.into(), info);
        self
    }

    pub fn signal<I>(mut self, name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.signals.insert(
            name.into(),
            SignalInfo {
                args: args.into_iter().map(Into::into).collect(),
            },
        );
        self
    }
}

/// Interface name to description, the payload of a `meta` frame.
pub type MetaData = IndexMap<String, InterfaceInfo>;
