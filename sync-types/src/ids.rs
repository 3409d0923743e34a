//! Identity and ordering types for the sync core.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A monotonically increasing identifier for a queued mutation.
///
/// Assigned by the durable action log on append. Within a collection,
/// replay order equals `ActionId` order, which equals enqueue order.
/// Sequence numbers are more reliable than timestamps because device
/// clocks can jump backwards.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct ActionId(u64);

impl ActionId {
    /// Create a new ActionId with the given value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the numeric value of this ActionId.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActionId({})", self.0)
    }
}

/// Error returned when a stored record id string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid placeholder record id: {0}")]
pub struct ParseRecordIdError(String);

/// An identifier for a record within a collection.
///
/// Records created while offline get a locally generated placeholder id;
/// the drain replaces it with the authoritative id assigned by the remote
/// store. That swap is the only place a consumer-visible id changes.
///
/// The string encoding is `local:<uuid>` for placeholders and the raw id
/// for remote ids; the `local:` prefix is reserved and never appears in
/// authoritative ids.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum RecordId {
    /// Placeholder assigned locally for a record created offline.
    Local(uuid::Uuid),
    /// Authoritative id assigned by the remote store.
    Remote(String),
}

impl RecordId {
    /// Generate a fresh placeholder id.
    pub fn local() -> Self {
        Self::Local(uuid::Uuid::new_v4())
    }

    /// Wrap an authoritative remote id.
    pub fn remote(id: impl Into<String>) -> Self {
        Self::Remote(id.into())
    }

    /// True for placeholder ids that have not been assigned a remote id.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    /// True for authoritative remote ids.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(uuid) => write!(f, "local:{}", uuid),
            Self::Remote(id) => write!(f, "{}", id),
        }
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self)
    }
}

impl FromStr for RecordId {
    type Err = ParseRecordIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix("local:") {
            Some(rest) => uuid::Uuid::parse_str(rest)
                .map(Self::Local)
                .map_err(|_| ParseRecordIdError(s.to_string())),
            None => Ok(Self::Remote(s.to_string())),
        }
    }
}

// Serialized as the string encoding so ids read naturally in JSON
// diagnostics and event payloads.
impl Serialize for RecordId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
