//! Delivery scopes and topics
//!
//! A scope addresses a published event to a set of subscribers. In storage it is split
//! into a kind (`scope` column) and an optional key (`scope_key` column); on the wire it
//! is the combined `kind:key` form (`global` has no key).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Event delivery scope
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Scope {
    /// Every connected client
    Global,
    /// One user account
    User(String),
    /// One operator console
    Operator(String),
    /// Subscribers watching a camera
    Camera(String),
    /// Everyone holding a role (e.g. `operator`, `supervisor`)
    Role(String),
    /// Subscribers following an incident
    Incident(String),
}

impl Scope {
    /// Storage kind (`scope` column)
    pub fn kind(&self) -> &'static str {
        match self {
            Scope::Global => "global",
            Scope::User(_) => "user",
            Scope::Operator(_) => "operator",
            Scope::Camera(_) => "camera",
            Scope::Role(_) => "role",
            Scope::Incident(_) => "incident",
        }
    }

    /// Storage key (`scope_key` column), `None` for global
    pub fn key(&self) -> Option<&str> {
        match self {
            Scope::Global => None,
            Scope::User(k)
            | Scope::Operator(k)
            | Scope::Camera(k)
            | Scope::Role(k)
            | Scope::Incident(k) => Some(k.as_str()),
        }
    }

    /// Rebuild a scope from its stored kind/key pair
    pub fn from_parts(kind: &str, key: Option<&str>) -> Result<Self> {
        let key = key.map(str::trim).filter(|k| !k.is_empty());
        let keyed = |make: fn(String) -> Scope| {
            key.map(|k| make(k.to_string())).ok_or_else(|| {
                Error::InvalidInput(format!("Scope '{}' requires a key", kind))
            })
        };

        match kind.trim().to_ascii_lowercase().as_str() {
            "global" => Ok(Scope::Global),
            "user" => keyed(Scope::User),
            "operator" => keyed(Scope::Operator),
            "camera" => keyed(Scope::Camera),
            "role" => keyed(Scope::Role),
            "incident" => keyed(Scope::Incident),
            other => Err(Error::InvalidInput(format!("Unknown scope '{}'", other))),
        }
    }

    /// Whether an envelope addressed to `self` should reach a subscriber of `filter`
    ///
    /// Global envelopes reach everyone.
    pub fn reaches(&self, filter: &Scope) -> bool {
        matches!(self, Scope::Global) || self == filter
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key() {
            Some(key) => write!(f, "{}:{}", self.kind(), key),
            None => f.write_str(self.kind()),
        }
    }
}

impl FromStr for Scope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((kind, key)) => Scope::from_parts(kind, Some(key)),
            None => Scope::from_parts(s, None),
        }
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.to_string()
    }
}

impl TryFrom<String> for Scope {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// Routing topic taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    Camera,
    Incident,
    Faces,
    Sensor,
    System,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Camera => "camera",
            Topic::Incident => "incident",
            Topic::Faces => "faces",
            Topic::Sensor => "sensor",
            Topic::System => "system",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "camera" => Ok(Topic::Camera),
            "incident" => Ok(Topic::Incident),
            "faces" => Ok(Topic::Faces),
            "sensor" => Ok(Topic::Sensor),
            "system" => Ok(Topic::System),
            other => Err(Error::InvalidInput(format!("Unknown topic '{}'", other))),
        }
    }
}

/// Event names used with the topics above
pub mod event_names {
    /// Per-sighting tracking update
    pub const TRACKING: &str = "tracking";
    /// A tracked person re-identified on a neighboring camera
    pub const CROSS_CAMERA_REID: &str = "cross_camera_reid";
    /// Service or configuration status change
    pub const STATUS: &str = "status";
}
