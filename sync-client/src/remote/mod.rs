//! Remote document store abstraction.
//!
//! The sync core consumes, but does not implement, a per-collection CRUD
//! contract against the product's remote document database. The error type
//! distinguishes transient (connectivity) failures from non-transient
//! (rejection) failures, because the coordinator's branching depends on it:
//! transient failures demote a write to the queue, non-transient failures
//! propagate to the caller untouched.

mod mock;

pub use mock::{MockRemote, RemoteCall};

use async_trait::async_trait;
use serde_json::Value;
use sync_types::{Filter, Record};
use thiserror::Error;

/// Errors from the remote document store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The remote store could not be reached (DNS failure, connection
    /// refused, no route).
    #[error("remote unreachable: {0}")]
    Unreachable(String),

    /// The call exceeded its deadline. Could be offline, could be a slow
    /// remote; treated as transient either way.
    #[error("remote call timed out")]
    Timeout,

    /// The remote store actively rejected the operation (validation,
    /// permission, conflict).
    #[error("remote rejected the operation: {reason}")]
    Rejected {
        /// Why the operation was rejected.
        reason: String,
    },

    /// The target record does not exist remotely.
    #[error("record not found: {collection}/{record_id}")]
    NotFound {
        /// Collection that was addressed.
        collection: String,
        /// Record id that was addressed.
        record_id: String,
    },
}

impl RemoteError {
    /// Connectivity-class failures justify queueing; rejections do not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Timeout)
    }
}

/// Per-collection CRUD contract of the remote document store.
///
/// Collections are logical entity buckets ("students", "classes"); record
/// ids are the store's authoritative string ids. Implementations must tag
/// errors with the correct [`RemoteError`] variant, since the coordinator
/// classifies by variant rather than by inspecting messages.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Create a record; the store assigns and returns the authoritative id.
    async fn create(&self, collection: &str, payload: &Value) -> Result<Record, RemoteError>;

    /// Overwrite the given fields of an existing record, returning the full
    /// post-update record.
    async fn update(
        &self,
        collection: &str,
        record_id: &str,
        payload: &Value,
    ) -> Result<Record, RemoteError>;

    /// Delete a record.
    async fn delete(&self, collection: &str, record_id: &str) -> Result<(), RemoteError>;

    /// List records, optionally filtered by one field's equality.
    async fn list(
        &self,
        collection: &str,
        filter: Option<&Filter>,
    ) -> Result<Vec<Record>, RemoteError>;
}
