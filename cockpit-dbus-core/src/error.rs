use serde::{Deserialize, Serialize};
use std::fmt;

/// Error names the bridge and test services report.
pub mod names {
    pub const FAILED: &str = "org.freedesktop.DBus.Error.Failed";
    pub const INVALID_ARGS: &str = "org.freedesktop.DBus.Error.InvalidArgs";
    pub const UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";
    pub const UNKNOWN_INTERFACE: &str = "org.freedesktop.DBus.Error.UnknownInterface";
    pub const UNKNOWN_OBJECT: &str = "org.freedesktop.DBus.Error.UnknownObject";
    pub const UNKNOWN_PROPERTY: &str = "org.freedesktop.DBus.Error.UnknownProperty";
    pub const PROPERTY_READ_ONLY: &str = "org.freedesktop.DBus.Error.PropertyReadOnly";
    pub const SERVICE_UNKNOWN: &str = "org.freedesktop.DBus.Error.ServiceUnknown";
    pub const NOT_SUPPORTED: &str = "org.freedesktop.DBus.Error.NotSupported";
}

/// Connection level failure codes, carried in `close` frames and in
/// rejections that never reached a remote object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Problem {
    ProtocolError,
    NotFound,
    AccessDenied,
    Disconnected,
    Terminated,
    InternalError,
    NotSupported,
    Other(String),
}

impl Problem {
    pub fn as_str(&self) -> &str {
        match self {
            Problem::ProtocolError => "protocol-error",
            Problem::NotFound => "not-found",
            Problem::AccessDenied => "access-denied",
            Problem::Disconnected => "disconnected",
            Problem::Terminated => "terminated",
            Problem::InternalError => "internal-error",
            Problem::NotSupported => "not-supported",
            Problem::Other(s) => s,
        }
    }

    /// Short human readable text used when a close carries no message.
    pub fn describe(&self) -> String {
        match self {
            Problem::ProtocolError => "Protocol error".to_string(),
            Problem::NotFound => "Not found".to_string(),
            Problem::AccessDenied => "Not permitted to perform this action".to_string(),
            Problem::Disconnected => "Server has closed the connection".to_string(),
            Problem::Terminated => "Your session has been terminated".to_string(),
            Problem::InternalError => "Internal error".to_string(),
            Problem::NotSupported => "Not supported".to_string(),
            Problem::Other(s) => s.clone(),
        }
    }
}

impl From<&str> for Problem {
    fn from(s: &str) -> Self {
        match s {
            "protocol-error" => Problem::ProtocolError,
            "not-found" => Problem::NotFound,
            "access-denied" => Problem::AccessDenied,
            "disconnected" => Problem::Disconnected,
            "terminated" => Problem::Terminated,
            "internal-error" => Problem::InternalError,
            "not-supported" => Problem::NotSupported,
            other => Problem::Other(other.to_string()),
        }
    }
}

impl From<String> for Problem {
    fn from(s: String) -> Self {
        Problem::from(s.as_str())
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Problem {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Problem {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Problem::from)
    }
}

/// Every way a call, watch or client can fail.
///
/// `Remote` errors came back from the object that executed the method.
/// `Problem` errors were detected locally or at the connection level.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DbusError {
    #[error("{name}: {message}")]
    Remote { name: String, message: String },

    #[error("{problem}: {message}")]
    Problem { problem: Problem, message: String },
}

impl DbusError {
    pub fn remote(name: impl Into<String>, message: impl Into<String>) -> Self {
        DbusError::Remote {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn problem(problem: Problem, message: impl Into<String>) -> Self {
        DbusError::Problem {
            problem,
            message: message.into(),
        }
    }

    /// A close or rejection that carries only a problem code.
    pub fn closed(problem: Problem) -> Self {
        let message = problem.describe();
        DbusError::Problem { problem, message }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::problem(Problem::ProtocolError, message)
    }

    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::remote(names::INVALID_ARGS, message)
    }

    pub fn unknown_method(message: impl Into<String>) -> Self {
        Self::remote(names::UNKNOWN_METHOD, message)
    }

    /// D-Bus error name, for remote errors.
    pub fn name(&self) -> Option<&str> {
        match self {
            DbusError::Remote { name, .. } => Some(name),
            DbusError::Problem { .. } => None,
        }
    }

    /// Problem code, for protocol and connection errors.
    pub fn problem_code(&self) -> Option<&Problem> {
        match self {
            DbusError::Remote { .. } => None,
            DbusError::Problem { problem, .. } => Some(problem),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            DbusError::Remote { message, .. } | DbusError::Problem { message, .. } => message,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, DbusError::Remote { .. })
    }
}

impl From<serde_json::Error> for DbusError {
    fn from(err: serde_json::Error) -> Self {
        DbusError::protocol(format!("JSON error: {}", err))
    }
}
