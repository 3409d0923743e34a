//! Queued mutations awaiting replay against the remote store.

use crate::{ActionId, RecordId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// A write operation that could not (or should not yet) be applied to the
/// remote store.
///
/// Each variant carries only the fields legal for its case: a `Delete` can
/// never carry a payload, and a `Create` never targets an existing remote
/// id, so illegal states are unrepresentable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mutation {
    /// Create a record. `local_id` is the placeholder key under which the
    /// optimistic snapshot lives until the drain assigns the authoritative
    /// remote id.
    Create {
        /// Placeholder id for the record being created.
        local_id: RecordId,
        /// The fields of the new record (JSON object).
        payload: Value,
    },
    /// Overwrite the given fields of an existing record.
    Update {
        /// Target record.
        record_id: RecordId,
        /// The fields to write (JSON object, a patch not a snapshot).
        payload: Value,
    },
    /// Delete a record.
    Delete {
        /// Target record.
        record_id: RecordId,
    },
}

impl Mutation {
    /// The record this mutation targets in the local cache.
    pub fn target(&self) -> &RecordId {
        match self {
            Self::Create { local_id, .. } => local_id,
            Self::Update { record_id, .. } => record_id,
            Self::Delete { record_id } => record_id,
        }
    }

    /// The kind tag, for logs and storage.
    pub fn kind(&self) -> MutationKind {
        match self {
            Self::Create { .. } => MutationKind::Create,
            Self::Update { .. } => MutationKind::Update,
            Self::Delete { .. } => MutationKind::Delete,
        }
    }
}

/// Error returned when a stored mutation kind string is unknown.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown mutation kind: {0}")]
pub struct ParseMutationKindError(String);

/// Discriminant of a [`Mutation`], used as the storage and log tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    /// A record creation.
    Create,
    /// A field update.
    Update,
    /// A record deletion.
    Delete,
}

impl MutationKind {
    /// Stable string form used in the durable log.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationKind {
    type Err = ParseMutationKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(ParseMutationKindError(other.to_string())),
        }
    }
}

/// A queued mutation together with its durable-log metadata.
///
/// Immutable once created; destroyed only after confirmed successful
/// replay. Within a collection, actions replay in `id` order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    /// Monotonic id assigned by the action log on append.
    pub id: ActionId,
    /// Logical entity bucket, e.g. "students" or "classes".
    pub collection: String,
    /// The queued write.
    pub mutation: Mutation,
    /// Unix seconds when the action was enqueued. Diagnostics only;
    /// ordering comes from `id`.
    pub enqueued_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn target_points_at_the_affected_record() {
        let local = RecordId::local();
        let create = Mutation::Create {
            local_id: local.clone(),
            payload: json!({"name": "Amina"}),
        };
        assert_eq!(create.target(), &local);

        let delete = Mutation::Delete {
            record_id: RecordId::remote("c1"),
        };
        assert_eq!(delete.target(), &RecordId::remote("c1"));
    }

    #[test]
    fn kind_matches_variant() {
        let update = Mutation::Update {
            record_id: RecordId::remote("c1"),
            payload: json!({"name": "Grade 5B"}),
        };
        assert_eq!(update.kind(), MutationKind::Update);
    }

    #[test]
    fn kind_string_roundtrip() {
        for kind in [
            MutationKind::Create,
            MutationKind::Update,
            MutationKind::Delete,
        ] {
            assert_eq!(kind.as_str().parse::<MutationKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_kind_fails_to_parse() {
        assert!("upsert".parse::<MutationKind>().is_err());
    }

    #[test]
    fn mutation_serializes_with_kind_tag() {
        let delete = Mutation::Delete {
            record_id: RecordId::remote("c1"),
        };
        let json = serde_json::to_value(&delete).unwrap();
        assert_eq!(json["kind"], "delete");
        assert_eq!(json["record_id"], "c1");
        // A delete never carries a payload.
        assert!(json.get("payload").is_none());
    }
}
