//! Durable local storage: the read cache and the pending-action log.
//!
//! Two concerns share one sqlite database:
//! - [`LocalStore`] - per-collection snapshots of the last-known record
//!   state, serving every read while offline.
//! - [`ActionLog`] - the durable FIFO log of mutations awaiting replay.
//!
//! Both are durable before their mutating calls return, so a process crash
//! between a write and the caller's next step cannot silently lose it.

mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use std::path::PathBuf;
use sync_types::{ActionId, Filter, Mutation, PendingAction, Record, RecordId};

/// Storage layer errors.
///
/// These are local durability failures (storage full, corruption): fatal
/// for the affected operation and always propagated, never swallowed.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A persisted row failed to decode.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// Database path error.
    #[error("invalid database path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: PathBuf,
    },
}

/// Per-collection cache of last-known-good record snapshots.
///
/// After any successful online operation or queue drain an entry reflects
/// the post-operation state; while offline it reflects the optimistic
/// projection of all enqueued mutations. Never the source of truth: the
/// remote store is authoritative once reachable.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Look up one record.
    async fn get(
        &self,
        collection: &str,
        record_id: &RecordId,
    ) -> Result<Option<Record>, StoreError>;

    /// List records, optionally filtered by one field's equality.
    async fn list(
        &self,
        collection: &str,
        filter: Option<&Filter>,
    ) -> Result<Vec<Record>, StoreError>;

    /// Overwrite-or-insert. Idempotent.
    async fn put(&self, collection: &str, record: &Record) -> Result<(), StoreError>;

    /// Remove a record. Idempotent; removing a missing record is not an
    /// error.
    async fn remove(&self, collection: &str, record_id: &RecordId) -> Result<(), StoreError>;

    /// Full materialization of a collection, for bulk list views.
    async fn snapshot(&self, collection: &str) -> Result<Vec<Record>, StoreError>;
}

/// Durable FIFO log of mutations awaiting remote application.
#[async_trait]
pub trait ActionLog: Send + Sync {
    /// Append a mutation, assigning the next monotonic action id.
    ///
    /// Atomic and durable: no partial write is visible after crash
    /// recovery, and a failure to persist surfaces here - losing a
    /// mutation is worse than failing the caller's request.
    async fn append(
        &self,
        collection: &str,
        mutation: &Mutation,
    ) -> Result<PendingAction, StoreError>;

    /// All pending actions in enqueue order.
    async fn pending(&self) -> Result<Vec<PendingAction>, StoreError>;

    /// Remove a replayed action. Idempotent; removing an absent id is a
    /// no-op.
    async fn remove_action(&self, id: ActionId) -> Result<(), StoreError>;

    /// Remove a replayed create and retarget every remaining action in
    /// `collection` addressing `placeholder` to `authoritative`.
    ///
    /// One atomic step: after it returns, no durable action addresses the
    /// placeholder, so queued work stays addressable even if the current
    /// replay pass is abandoned before reaching it.
    async fn resolve_placeholder(
        &self,
        id: ActionId,
        collection: &str,
        placeholder: &RecordId,
        authoritative: &RecordId,
    ) -> Result<(), StoreError>;

    /// Number of actions awaiting replay.
    async fn pending_count(&self) -> Result<u64, StoreError>;

    /// Remove all actions. Administrative reset only.
    async fn clear(&self) -> Result<(), StoreError>;

    /// When the queue last fully drained (unix seconds). Diagnostics only,
    /// never used for correctness.
    async fn last_synced_at(&self) -> Result<Option<i64>, StoreError>;

    /// Record a full, successful drain.
    async fn set_last_synced_at(&self, at: i64) -> Result<(), StoreError>;
}

/// The full storage surface the coordinator consumes: cache plus queue,
/// backed by one database so both share durability guarantees.
pub trait SyncStore: LocalStore + ActionLog {}

impl<T: LocalStore + ActionLog> SyncStore for T {}
