use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Cookie pairing a `call` or `watch` frame with its `reply`/`error`.
///
/// On the wire the id is a decimal string, matching what browser peers send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(u64);

impl CallId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<u64> for CallId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl FromStr for CallId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(CallId)
    }
}

impl Serialize for CallId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for CallId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        match &value {
            serde_json::Value::String(s) => s.parse().map_err(serde::de::Error::custom),
            serde_json::Value::Number(n) => n
                .as_u64()
                .map(CallId)
                .ok_or_else(|| serde::de::Error::custom("call id out of range")),
            _ => Err(serde::de::Error::custom("call id must be a string")),
        }
    }
}

/// Hands out call ids for one client, starting from 1.
///
/// Ids are never reused within a client, even after the call settles.
#[derive(Debug)]
pub struct CallIdAllocator {
    last: u64,
}

impl CallIdAllocator {
    pub fn new() -> Self {
        Self { last: 0 }
    }

    pub fn allocate(&mut self) -> CallId {
        self.last += 1;
        CallId(self.last)
    }
}

impl Default for CallIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
