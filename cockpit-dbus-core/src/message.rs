// Frames of the D-Bus JSON protocol
// Each frame is a JSON object keyed by its kind ("call", "reply", "notify", ...)
// or, for channel control, a "command" field.

use crate::error::{DbusError, Problem};
use crate::ids::CallId;
use crate::meta::MetaData;
use crate::names::{is_interface, is_member, is_object_path, path_in_namespace};
use crate::notify::{NotifyDiff, NotifyError};
use crate::signature::Signature;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Payload name announced in `open`.
pub const PAYLOAD: &str = "dbus-json3";

/// Characters allowed in a call's `flags` field.
pub const VALID_FLAGS: &[char] = &['<', '>', 'i'];

/// Byte order marker the bridge puts in reply flags.
pub fn native_byte_order() -> &'static str {
    if cfg!(target_endian = "big") {
        ">"
    } else {
        "<"
    }
}

/// Signal filter used by `add-match` and `remove-match`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member: Option<String>,
}

impl MatchRule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn path_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.path_namespace = Some(namespace.into());
        self
    }

    pub fn interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    pub fn member(mut self, member: impl Into<String>) -> Self {
        self.member = Some(member.into());
        self
    }

    pub fn matches(&self, signal: &SignalMessage) -> bool {
        if let Some(path) = &self.path {
            if *path != signal.path {
                return false;
            }
        }
        if let Some(namespace) = &self.path_namespace {
            if !path_in_namespace(&signal.path, namespace) {
                return false;
            }
        }
        if let Some(interface) = &self.interface {
            if *interface != signal.interface {
                return false;
            }
        }
        if let Some(member) = &self.member {
            if *member != signal.member {
                return false;
            }
        }
        true
    }

    pub fn validate(&self) -> Result<(), DbusError> {
        for path in self.path.iter().chain(self.path_namespace.iter()) {
            if !is_object_path(path) {
                return Err(DbusError::protocol(format!(
                    "object path is invalid in match rule: {}",
                    path
                )));
            }
        }
        if let Some(interface) = &self.interface {
            if !is_interface(interface) {
                return Err(DbusError::protocol(format!(
                    "interface name is invalid in match rule: {}",
                    interface
                )));
            }
        }
        if let Some(member) = &self.member {
            if !is_member(member) {
                return Err(DbusError::protocol(format!(
                    "member name is invalid in match rule: {}",
                    member
                )));
            }
        }
        Ok(())
    }
}

/// Scope of a `watch`: one exact path or a path namespace, optionally
/// narrowed to one interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WatchSelector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
}

impl WatchSelector {
    pub fn path(path: impl Into<String>) -> Self {
        WatchSelector {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn namespace(namespace: impl Into<String>) -> Self {
        WatchSelector {
            path_namespace: Some(namespace.into()),
            ..Default::default()
        }
    }

    pub fn interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    pub fn covers(&self, path: &str, interface: &str) -> bool {
        if let Some(iface) = &self.interface {
            if iface != interface {
                return false;
            }
        }
        self.covers_path(path)
    }

    pub fn covers_path(&self, path: &str) -> bool {
        match (&self.path, &self.path_namespace) {
            (Some(p), _) => p == path,
            (None, Some(ns)) => path_in_namespace(path, ns),
            (None, None) => path_in_namespace(path, "/"),
        }
    }

    pub fn validate(&self) -> Result<(), DbusError> {
        for path in self.path.iter().chain(self.path_namespace.iter()) {
            if !is_object_path(path) {
                return Err(DbusError::protocol(format!(
                    "object path is invalid in watch: {}",
                    path
                )));
            }
        }
        if let Some(interface) = &self.interface {
            if !is_interface(interface) {
                return Err(DbusError::protocol(format!(
                    "interface name is invalid in watch: {}",
                    interface
                )));
            }
        }
        Ok(())
    }
}

impl From<&str> for WatchSelector {
    fn from(path: &str) -> Self {
        WatchSelector::path(path)
    }
}

/// Parameters of the `open` command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpenOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bus: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superuser: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub track: bool,
}

/// A signal as delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalMessage {
    pub path: String,
    pub interface: String,
    pub member: String,
    pub args: Vec<Value>,
}

/// Per-call overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Signature of the arguments, bypassing introspection.
    pub signature: Option<String>,
    /// Byte order and behaviour flags, drawn from [`VALID_FLAGS`].
    pub flags: Option<String>,
}

impl CallOptions {
    pub fn with_signature(signature: impl Into<String>) -> Self {
        CallOptions {
            signature: Some(signature.into()),
            flags: None,
        }
    }

    pub fn flags(mut self, flags: impl Into<String>) -> Self {
        self.flags = Some(flags.into());
        self
    }
}

pub fn flags_are_valid(flags: &str) -> bool {
    flags.chars().all(|c| VALID_FLAGS.contains(&c))
}

/// The structural checks a call must pass before it is sent.
pub fn validate_call(
    path: &str,
    interface: &str,
    member: &str,
    options: &CallOptions,
) -> Result<(), DbusError> {
    if !is_object_path(path) {
        return Err(DbusError::protocol(format!(
            "object path is invalid in \"call\": {}",
            path
        )));
    }
    if !is_interface(interface) {
        return Err(DbusError::protocol(format!(
            "interface name is invalid in \"call\": {}",
            interface
        )));
    }
    if !is_member(member) {
        return Err(DbusError::protocol(format!(
            "member name is invalid in \"call\": {}",
            member
        )));
    }
    if let Some(signature) = &options.signature {
        if !Signature::is_valid(signature) {
            return Err(DbusError::protocol(format!(
                "the type signature is not valid: {}",
                signature
            )));
        }
    }
    if let Some(flags) = &options.flags {
        if !flags_are_valid(flags) {
            return Err(DbusError::protocol("the flags field is invalid"));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// `{"command": "open", ...}`
    Open(OpenOptions),
    /// `{"command": "ready", "unique-name": ...}`
    Ready { unique_name: Option<String> },
    /// `{"command": "close", "problem": ..., "message": ...}`
    Close {
        problem: Option<Problem>,
        message: Option<String>,
    },
    /// `{"call": [path, iface, member, args], "id": ..., "type": ..., "flags": ...}`
    Call {
        id: CallId,
        path: String,
        interface: String,
        member: String,
        args: Vec<Value>,
        signature: Option<String>,
        flags: Option<String>,
    },
    /// `{"reply": [args], "id": ..., "type": ..., "flags": ...}`
    Reply {
        id: CallId,
        args: Vec<Value>,
        signature: Option<String>,
        flags: Option<String>,
    },
    /// `{"error": [name, [message]], "id": ...}`
    Error {
        id: CallId,
        name: String,
        message: String,
    },
    /// `{"signal": [path, iface, member, args]}`
    Signal(SignalMessage),
    /// `{"notify": {path: {iface: props | null}}}`
    Notify(NotifyDiff),
    /// `{"meta": {iface: description}}`
    Meta(MetaData),
    /// `{"owner": unique-name | null}`
    Owner(Option<String>),
    AddMatch(MatchRule),
    RemoveMatch(MatchRule),
    Watch { id: CallId, selector: WatchSelector },
    Unwatch(WatchSelector),
}

/// A frame plus the sequence number the bridge stamps on everything it sends.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub seq: Option<u64>,
    pub frame: Frame,
}

impl Message {
    pub fn new(frame: Frame) -> Self {
        Message { seq: None, frame }
    }

    pub fn sequenced(seq: u64, frame: Frame) -> Self {
        Message {
            seq: Some(seq),
            frame,
        }
    }

    pub fn to_json(&self) -> Value {
        let mut value = self.frame.to_json();
        if let (Some(seq), Value::Object(obj)) = (self.seq, &mut value) {
            obj.insert("seq".to_string(), json!(seq));
        }
        value
    }

    pub fn from_json(value: &Value) -> Result<Self, FrameError> {
        let obj = value.as_object().ok_or(FrameError::NotAnObject)?;
        let seq = match obj.get("seq") {
            None => None,
            Some(v) => Some(v.as_u64().ok_or(FrameError::InvalidSeq)?),
        };
        Ok(Message {
            seq,
            frame: Frame::from_json(value)?,
        })
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        Message::new(frame)
    }
}

impl Serialize for Message {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Message::from_json(&value).map_err(|e| serde::de::Error::custom(e.to_string()))
    }
}

fn parse_id(obj: &Map<String, Value>) -> Result<CallId, FrameError> {
    let id = obj.get("id").ok_or(FrameError::MissingId)?;
    serde_json::from_value(id.clone()).map_err(|_| FrameError::MissingId)
}

fn optional_string(obj: &Map<String, Value>, key: &str) -> Result<Option<String>, FrameError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(FrameError::InvalidField(key.to_string())),
    }
}

fn parse_type(obj: &Map<String, Value>) -> Result<Option<String>, FrameError> {
    match obj.get("type") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if Signature::is_valid(s) => Ok(Some(s.clone())),
        Some(Value::String(s)) => Err(FrameError::InvalidSignature(s.clone())),
        Some(_) => Err(FrameError::InvalidType),
    }
}

fn parse_flags(obj: &Map<String, Value>) -> Result<Option<String>, FrameError> {
    match obj.get("flags") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if flags_are_valid(s) => Ok(Some(s.clone())),
        Some(_) => Err(FrameError::InvalidFlags),
    }
}

fn string_at(arr: &[Value], index: usize, what: &'static str) -> Result<String, FrameError> {
    arr.get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(FrameError::Malformed(what))
}

fn args_at(arr: &[Value], index: usize, what: &'static str) -> Result<Vec<Value>, FrameError> {
    match arr.get(index) {
        None => Ok(Vec::new()),
        Some(Value::Array(args)) => Ok(args.clone()),
        Some(_) => Err(FrameError::Malformed(what)),
    }
}

fn put_opt(obj: &mut Map<String, Value>, key: &str, value: &Option<String>) {
    if let Some(value) = value {
        obj.insert(key.to_string(), Value::String(value.clone()));
    }
}

impl Frame {
    pub fn to_json(&self) -> Value {
        match self {
            Frame::Open(options) => {
                let mut obj = match serde_json::to_value(options) {
                    Ok(Value::Object(obj)) => obj,
                    _ => Map::new(),
                };
                obj.insert("command".to_string(), json!("open"));
                obj.insert("payload".to_string(), json!(PAYLOAD));
                Value::Object(obj)
            }
            Frame::Ready { unique_name } => {
                let mut obj = Map::new();
                obj.insert("command".to_string(), json!("ready"));
                put_opt(&mut obj, "unique-name", unique_name);
                Value::Object(obj)
            }
            Frame::Close { problem, message } => {
                let mut obj = Map::new();
                obj.insert("command".to_string(), json!("close"));
                if let Some(problem) = problem {
                    obj.insert("problem".to_string(), json!(problem.as_str()));
                }
                put_opt(&mut obj, "message", message);
                Value::Object(obj)
            }
            Frame::Call {
                id,
                path,
                interface,
                member,
                args,
                signature,
                flags,
            } => {
                let mut obj = Map::new();
                obj.insert("call".to_string(), json!([path, interface, member, args]));
                obj.insert("id".to_string(), json!(id));
                put_opt(&mut obj, "type", signature);
                put_opt(&mut obj, "flags", flags);
                Value::Object(obj)
            }
            Frame::Reply {
                id,
                args,
                signature,
                flags,
            } => {
                let mut obj = Map::new();
                obj.insert("reply".to_string(), json!([args]));
                obj.insert("id".to_string(), json!(id));
                put_opt(&mut obj, "type", signature);
                put_opt(&mut obj, "flags", flags);
                Value::Object(obj)
            }
            Frame::Error { id, name, message } => {
                json!({"error": [name, [message]], "id": id})
            }
            Frame::Signal(signal) => json!({
                "signal": [signal.path, signal.interface, signal.member, signal.args]
            }),
            Frame::Notify(diff) => json!({"notify": diff.to_json()}),
            Frame::Meta(meta) => json!({"meta": meta}),
            Frame::Owner(owner) => json!({"owner": owner}),
            Frame::AddMatch(rule) => json!({"add-match": rule}),
            Frame::RemoveMatch(rule) => json!({"remove-match": rule}),
            Frame::Watch { id, selector } => json!({"watch": selector, "id": id}),
            Frame::Unwatch(selector) => json!({"unwatch": selector}),
        }
    }

    pub fn from_json(value: &Value) -> Result<Self, FrameError> {
        let obj = value.as_object().ok_or(FrameError::NotAnObject)?;

        if let Some(command) = obj.get("command") {
            let command = command.as_str().ok_or(FrameError::InvalidField("command".into()))?;
            return match command {
                "open" => {
                    let options: OpenOptions = serde_json::from_value(value.clone())
                        .map_err(|e| FrameError::InvalidOpen(e.to_string()))?;
                    Ok(Frame::Open(options))
                }
                "ready" => Ok(Frame::Ready {
                    unique_name: optional_string(obj, "unique-name")?,
                }),
                "close" => Ok(Frame::Close {
                    problem: optional_string(obj, "problem")?.map(Problem::from),
                    message: optional_string(obj, "message")?,
                }),
                other => Err(FrameError::UnknownCommand(other.to_string())),
            };
        }

        if let Some(call) = obj.get("call") {
            let arr = call.as_array().ok_or(FrameError::Malformed("call"))?;
            return Ok(Frame::Call {
                id: parse_id(obj)?,
                path: string_at(arr, 0, "call")?,
                interface: string_at(arr, 1, "call")?,
                member: string_at(arr, 2, "call")?,
                args: args_at(arr, 3, "call")?,
                signature: parse_type(obj)?,
                flags: parse_flags(obj)?,
            });
        }

        if let Some(reply) = obj.get("reply") {
            let arr = reply.as_array().ok_or(FrameError::Malformed("reply"))?;
            return Ok(Frame::Reply {
                id: parse_id(obj)?,
                args: args_at(arr, 0, "reply")?,
                signature: parse_type(obj)?,
                flags: optional_string(obj, "flags")?,
            });
        }

        if let Some(error) = obj.get("error") {
            let arr = error.as_array().ok_or(FrameError::Malformed("error"))?;
            let name = string_at(arr, 0, "error")?;
            let message = args_at(arr, 1, "error")?
                .first()
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Ok(Frame::Error {
                id: parse_id(obj)?,
                name,
                message,
            });
        }

        if let Some(signal) = obj.get("signal") {
            let arr = signal.as_array().ok_or(FrameError::Malformed("signal"))?;
            return Ok(Frame::Signal(SignalMessage {
                path: string_at(arr, 0, "signal")?,
                interface: string_at(arr, 1, "signal")?,
                member: string_at(arr, 2, "signal")?,
                args: args_at(arr, 3, "signal")?,
            }));
        }

        if let Some(notify) = obj.get("notify") {
            return Ok(Frame::Notify(NotifyDiff::from_json(notify)?));
        }

        if let Some(meta) = obj.get("meta") {
            let meta: MetaData = serde_json::from_value(meta.clone())
                .map_err(|e| FrameError::InvalidMeta(e.to_string()))?;
            return Ok(Frame::Meta(meta));
        }

        if let Some(owner) = obj.get("owner") {
            return match owner {
                Value::Null => Ok(Frame::Owner(None)),
                Value::String(s) => Ok(Frame::Owner(Some(s.clone()))),
                _ => Err(FrameError::InvalidField("owner".into())),
            };
        }

        if let Some(rule) = obj.get("add-match") {
            return Ok(Frame::AddMatch(parse_rule(rule, "add-match")?));
        }

        if let Some(rule) = obj.get("remove-match") {
            return Ok(Frame::RemoveMatch(parse_rule(rule, "remove-match")?));
        }

        if let Some(selector) = obj.get("watch") {
            return Ok(Frame::Watch {
                id: parse_id(obj)?,
                selector: parse_selector(selector, "watch")?,
            });
        }

        if let Some(selector) = obj.get("unwatch") {
            return Ok(Frame::Unwatch(parse_selector(selector, "unwatch")?));
        }

        Err(FrameError::UnknownFrame)
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Open(_) => "open",
            Frame::Ready { .. } => "ready",
            Frame::Close { .. } => "close",
            Frame::Call { .. } => "call",
            Frame::Reply { .. } => "reply",
            Frame::Error { .. } => "error",
            Frame::Signal(_) => "signal",
            Frame::Notify(_) => "notify",
            Frame::Meta(_) => "meta",
            Frame::Owner(_) => "owner",
            Frame::AddMatch(_) => "add-match",
            Frame::RemoveMatch(_) => "remove-match",
            Frame::Watch { .. } => "watch",
            Frame::Unwatch(_) => "unwatch",
        }
    }
}

fn parse_rule(value: &Value, what: &'static str) -> Result<MatchRule, FrameError> {
    serde_json::from_value(value.clone()).map_err(|_| FrameError::Malformed(what))
}

fn parse_selector(value: &Value, what: &'static str) -> Result<WatchSelector, FrameError> {
    serde_json::from_value(value.clone()).map_err(|_| FrameError::Malformed(what))
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("message must be a JSON object")]
    NotAnObject,

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("unknown message kind")]
    UnknownFrame,

    #[error("malformed \"{0}\" message")]
    Malformed(&'static str),

    #[error("the \"{0}\" field is invalid")]
    InvalidField(String),

    #[error("missing or invalid id field")]
    MissingId,

    #[error("the seq field is invalid")]
    InvalidSeq,

    #[error("the type field is invalid")]
    InvalidType,

    #[error("the type signature is not valid: {0}")]
    InvalidSignature(String),

    #[error("the flags field is invalid")]
    InvalidFlags,

    #[error("invalid open options: {0}")]
    InvalidOpen(String),

    #[error("invalid meta payload: {0}")]
    InvalidMeta(String),

    #[error(transparent)]
    Notify(#[from] NotifyError),
}

impl From<FrameError> for DbusError {
    fn from(err: FrameError) -> Self {
        DbusError::protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FROBBER: &str = "com.redhat.Cockpit.DBusTests.Frobber";

    #[test]
    fn test_call_shape() {
        let frame = Frame::Call {
            id: CallId::new(3),
            path: "/otree/frobber".into(),
            interface: FROBBER.into(),
            member: "HelloWorld".into(),
            args: vec![json!("Browser-side JS")],
            signature: Some("s".into()),
            flags: None,
        };
        let value = frame.to_json();
        assert_eq!(
            value,
            json!({
                "call": ["/otree/frobber", FROBBER, "HelloWorld", ["Browser-side JS"]],
                "id": "3",
                "type": "s"
            })
        );
        assert_eq!(Frame::from_json(&value).unwrap(), frame);
    }

    #[test]
    fn test_reply_and_error_shapes() {
        let reply = Frame::Reply {
            id: CallId::new(1),
            args: vec![json!("hi")],
            signature: Some("s".into()),
            flags: Some("<".into()),
        };
        assert_eq!(
            reply.to_json(),
            json!({"reply": [["hi"]], "id": "1", "type": "s", "flags": "<"})
        );

        let error = Frame::Error {
            id: CallId::new(2),
            name: "org.freedesktop.DBus.Error.UnknownMethod".into(),
            message: "nope".into(),
        };
        assert_eq!(
            error.to_json(),
            json!({"error": ["org.freedesktop.DBus.Error.UnknownMethod", ["nope"]], "id": "2"})
        );
        assert_eq!(Frame::from_json(&error.to_json()).unwrap(), error);
    }

    #[test]
    fn test_type_and_flags_validation() {
        let call = |extra: Value| {
            let mut value = json!({"call": ["/p", "a.b", "M", []], "id": "1"});
            if let (Value::Object(obj), Value::Object(extra)) = (&mut value, extra) {
                obj.extend(extra);
            }
            Frame::from_json(&value)
        };

        assert!(call(json!({"type": "s", "flags": "<i"})).is_ok());
        assert_eq!(
            call(json!({"type": 5})).unwrap_err().to_string(),
            "the type field is invalid"
        );
        assert_eq!(
            call(json!({"type": "!!"})).unwrap_err().to_string(),
            "the type signature is not valid: !!"
        );
        assert_eq!(
            call(json!({"flags": 5})).unwrap_err().to_string(),
            "the flags field is invalid"
        );
        assert!(call(json!({"flags": "x"})).is_err());
    }

    #[test]
    fn test_sequence_number_wraps_frame() {
        let msg = Message::sequenced(9, Frame::Owner(Some(":1.1".into())));
        let value = msg.to_json();
        assert_eq!(value, json!({"owner": ":1.1", "seq": 9}));
        assert_eq!(Message::from_json(&value).unwrap(), msg);

        let unsequenced = Message::from_json(&json!({"owner": null})).unwrap();
        assert_eq!(unsequenced.seq, None);
        assert!(Message::from_json(&json!({"owner": null, "seq": "x"})).is_err());
    }

    #[test]
    fn test_commands() {
        let open = Frame::Open(OpenOptions {
            bus: Some("session".into()),
            name: Some("com.redhat.Cockpit.DBusTests.Test".into()),
            ..Default::default()
        });
        let value = open.to_json();
        assert_eq!(value["command"], "open");
        assert_eq!(value["payload"], PAYLOAD);
        assert!(value.get("track").is_none());
        assert_eq!(Frame::from_json(&value).unwrap(), open);

        let close = Frame::Close {
            problem: Some(Problem::from("blah-blah")),
            message: None,
        };
        assert_eq!(close.to_json(), json!({"command": "close", "problem": "blah-blah"}));
        assert_eq!(Frame::from_json(&close.to_json()).unwrap(), close);

        assert!(matches!(
            Frame::from_json(&json!({"command": "frobnicate"})),
            Err(FrameError::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_match_and_watch_frames() {
        let rule = MatchRule::new().interface(FROBBER).path("/otree/frobber");
        let frame = Frame::AddMatch(rule.clone());
        assert_eq!(
            frame.to_json(),
            json!({"add-match": {"path": "/otree/frobber", "interface": FROBBER}})
        );
        assert_eq!(Frame::from_json(&frame.to_json()).unwrap(), frame);

        let watch = Frame::Watch {
            id: CallId::new(4),
            selector: WatchSelector::namespace("/cliques"),
        };
        assert_eq!(
            watch.to_json(),
            json!({"watch": {"path_namespace": "/cliques"}, "id": "4"})
        );
        assert_eq!(Frame::from_json(&watch.to_json()).unwrap(), watch);
    }

    #[test]
    fn test_rule_matching() {
        let signal = SignalMessage {
            path: "/otree/frobber".into(),
            interface: FROBBER.into(),
            member: "TestSignal".into(),
            args: vec![],
        };
        assert!(MatchRule::new().matches(&signal));
        assert!(MatchRule::new().path_namespace("/otree").matches(&signal));
        assert!(MatchRule::new().interface(FROBBER).member("TestSignal").matches(&signal));
        assert!(!MatchRule::new().path("/otree").matches(&signal));
        assert!(!MatchRule::new().member("Other").matches(&signal));
    }

    #[test]
    fn test_selector_coverage() {
        let exact = WatchSelector::path("/otree/frobber");
        assert!(exact.covers("/otree/frobber", FROBBER));
        assert!(!exact.covers("/otree/frobber/child", FROBBER));

        let ns = WatchSelector::namespace("/otree").interface(FROBBER);
        assert!(ns.covers("/otree/frobber/child", FROBBER));
        assert!(!ns.covers("/otree/frobber", "com.redhat.Cockpit.DBusTests.Alpha"));
    }

    #[test]
    fn test_validate_call_order() {
        let ok = CallOptions::default();
        let err = validate_call("invalid/path", "bad", "9", &ok).unwrap_err();
        assert_eq!(err.problem_code(), Some(&Problem::ProtocolError));
        assert!(err.message().contains("invalid/path"));

        let err = validate_call("/p", "bad", "M", &ok).unwrap_err();
        assert!(err.message().contains("interface"));

        let err = validate_call("/p", "a.b", "Bad.Member", &ok).unwrap_err();
        assert!(err.message().contains("Bad.Member"));

        let err = validate_call("/p", "a.b", "M", &CallOptions::with_signature("bad signature"))
            .unwrap_err();
        assert_eq!(err.message(), "the type signature is not valid: bad signature");

        let err = validate_call("/p", "a.b", "M", &CallOptions::default().flags("x")).unwrap_err();
        assert_eq!(err.message(), "the flags field is invalid");

        let options = CallOptions::with_signature("s").flags("<");
        assert!(validate_call("/p", "a.b", "M", &options).is_ok());
    }
}
