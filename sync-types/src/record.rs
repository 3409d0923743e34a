//! Record snapshots and the narrow filter shape callers use.

use crate::RecordId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A snapshot of a record as last known locally.
///
/// Always a full snapshot, never a delta: the cache can be read without
/// replaying history. `synced == false` marks optimistic state written
/// locally but not yet confirmed by the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// The record's identifier (placeholder or authoritative).
    pub id: RecordId,
    /// The record's fields as a JSON object.
    pub fields: Value,
    /// False while the record carries not-yet-replayed local state.
    pub synced: bool,
}

impl Record {
    /// A snapshot confirmed by the remote store.
    pub fn synced(id: RecordId, fields: Value) -> Self {
        Self {
            id,
            fields,
            synced: true,
        }
    }

    /// An optimistic snapshot awaiting replay.
    pub fn unsynced(id: RecordId, fields: Value) -> Self {
        Self {
            id,
            fields,
            synced: false,
        }
    }

    /// Look up one field by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// A single-field equality predicate, e.g. `class_id == "c1"`.
///
/// Mirrors the only query shape the app's list views use; anything richer
/// belongs in the remote store's query language, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Name of the field to compare.
    pub field: String,
    /// Value the field must equal.
    pub equals: Value,
}

impl Filter {
    /// Build an equality filter.
    pub fn eq(field: impl Into<String>, equals: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            equals: equals.into(),
        }
    }

    /// Check whether a record satisfies this filter.
    pub fn matches(&self, record: &Record) -> bool {
        record.field(&self.field) == Some(&self.equals)
    }
}
