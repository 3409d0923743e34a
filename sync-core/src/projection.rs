//! Optimistic projection of mutations onto local snapshots.
//!
//! While offline, the local cache must reflect every enqueued mutation
//! applied in order on top of the last synced snapshot, so reads stay
//! consistent with what the caller just wrote. This module computes the
//! cache effect of a single mutation; the client applies it durably.

use serde_json::{Map, Value};
use sync_types::{Mutation, Record, RecordId};

/// The effect a mutation has on the local cache.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalEffect {
    /// Upsert this snapshot under its id.
    Put(Record),
    /// Remove the snapshot under this id.
    Remove(RecordId),
}

/// Compute the optimistic local effect of a mutation, given the existing
/// snapshot (if any).
///
/// Update payloads are field patches: they overlay the last known snapshot
/// so the cache keeps holding full snapshots rather than deltas. The
/// resulting records are marked unsynced until replay confirms them.
pub fn project(mutation: &Mutation, existing: Option<&Record>) -> LocalEffect {
    match mutation {
        Mutation::Create { local_id, payload } => {
            LocalEffect::Put(Record::unsynced(local_id.clone(), payload.clone()))
        }
        Mutation::Update { record_id, payload } => {
            let base = existing
                .map(|record| record.fields.clone())
                .unwrap_or_else(|| Value::Object(Map::new()));
            LocalEffect::Put(Record::unsynced(
                record_id.clone(),
                merge_fields(base, payload),
            ))
        }
        Mutation::Delete { record_id } => LocalEffect::Remove(record_id.clone()),
    }
}

/// Overlay `patch`'s fields onto `base`.
///
/// Both are expected to be JSON objects; if either is not, the patch wins
/// outright, matching last-writer semantics.
pub fn merge_fields(base: Value, patch: &Value) -> Value {
    match (base, patch) {
        (Value::Object(mut base), Value::Object(patch)) => {
            for (key, value) in patch {
                base.insert(key.clone(), value.clone());
            }
            Value::Object(base)
        }
        (_, patch) => patch.clone(),
    }
}
