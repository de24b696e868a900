//! Named resources shared between interpreter processes.
//!
//! Every process owns a [`ResourcePool`](pool::ResourcePool) with a unique id.
//! A resource is addressed by its pool id (the *location*) and its name.
//! `*` stands for any location or any name; any other name pattern is a
//! regular expression that must match the whole name.

pub mod pool;
pub mod well_known;

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::error::{Error, Result};

pub use pool::{ResourcePool, ResourcePoolEventHandler};

/// Wildcard location: every pool.
pub const LOCATION_ANY: &str = "*";

/// Wildcard name pattern: every name.
pub const NAME_ANY: &str = "*";

/// Address of a resource.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct ResourceKey {
    pub location: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(location: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.location, self.name)
    }
}

/// Description of a resource as returned by searches.
///
/// Equality and hashing only consider the key.
#[derive(
    Debug,
    Clone,
    serde::Serialize,
    serde::Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
pub struct ResourceInfo {
    pub location: String,
    pub name: String,
    /// Whether the payload can leave its process.
    pub serializable: bool,
}

impl ResourceInfo {
    pub fn new(location: impl Into<String>, name: impl Into<String>, serializable: bool) -> Self {
        Self {
            location: location.into(),
            name: name.into(),
            serializable,
        }
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.location.clone(), self.name.clone())
    }
}

impl PartialEq for ResourceInfo {
    fn eq(&self, other: &Self) -> bool {
        self.location == other.location && self.name == other.name
    }
}

impl Eq for ResourceInfo {}

impl Hash for ResourceInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.location.hash(state);
        self.name.hash(state);
    }
}

/// A stored resource.
///
/// `Serializable` values can be copied to other processes as JSON. `Local`
/// values never leave the process that put them.
#[derive(Clone)]
pub enum ResourceValue {
    Serializable(Value),
    Local(Arc<dyn Any + Send + Sync>),
}

impl ResourceValue {
    pub fn local<T: Any + Send + Sync>(value: T) -> Self {
        ResourceValue::Local(Arc::new(value))
    }

    pub fn is_serializable(&self) -> bool {
        matches!(self, ResourceValue::Serializable(_))
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResourceValue::Serializable(value) => Some(value),
            ResourceValue::Local(_) => None,
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            ResourceValue::Local(value) => value.downcast_ref(),
            ResourceValue::Serializable(_) => None,
        }
    }

    /// Decode a serializable value into `T`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match self {
            ResourceValue::Serializable(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            ResourceValue::Local(_) => Ok(None),
        }
    }

    /// Wire payload; `None` for local values.
    pub fn to_bytes(&self) -> Result<Option<Vec<u8>>> {
        match self {
            ResourceValue::Serializable(value) => Ok(Some(serde_json::to_vec(value)?)),
            ResourceValue::Local(_) => Ok(None),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(ResourceValue::Serializable(serde_json::from_slice(bytes)?))
    }
}

impl fmt::Debug for ResourceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceValue::Serializable(value) => f.debug_tuple("Serializable").field(value).finish(),
            ResourceValue::Local(_) => f.debug_tuple("Local").field(&"..").finish(),
        }
    }
}

impl From<Value> for ResourceValue {
    fn from(value: Value) -> Self {
        ResourceValue::Serializable(value)
    }
}

impl From<&str> for ResourceValue {
    fn from(value: &str) -> Self {
        ResourceValue::Serializable(Value::String(value.to_string()))
    }
}

impl From<String> for ResourceValue {
    fn from(value: String) -> Self {
        ResourceValue::Serializable(Value::String(value))
    }
}

/// Compiled name pattern.
#[derive(Debug, Clone)]
pub enum NamePattern {
    Any,
    Regex(Regex),
}

impl NamePattern {
    pub fn new(pattern: &str) -> Result<Self> {
        if pattern == NAME_ANY {
            return Ok(NamePattern::Any);
        }
        Regex::new(&format!("^(?:{})$", pattern))
            .map(NamePattern::Regex)
            .map_err(|e| Error::InvalidPattern {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })
    }

    pub fn is_match(&self, name: &str) -> bool {
        match self {
            NamePattern::Any => true,
            NamePattern::Regex(regex) => regex.is_match(name),
        }
    }
}

/// Whether `location` is `*` or equal to `pool_id`.
pub fn location_matches(location: &str, pool_id: &str) -> bool {
    location == LOCATION_ANY || location == pool_id
}

/// Whether a resource is selected by a location and a name pattern.
///
/// Invalid patterns select nothing.
pub fn matches(location: &str, name_pattern: &str, info: &ResourceInfo) -> bool {
    if !location_matches(location, &info.location) {
        return false;
    }
    match NamePattern::new(name_pattern) {
        Ok(pattern) => pattern.is_match(&info.name),
        Err(e) => {
            warn!("{}", e);
            false
        }
    }
}
