//! Mock remote store for testing.
//!
//! An in-memory document store with failure injection and call recording,
//! so tests can force timeouts, assert replay order, and inspect the
//! authoritative state after a drain.

use super::{RemoteError, RemoteStore};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use sync_core::merge_fields;
use sync_types::{Filter, Record, RecordId};

/// A recorded remote invocation, for asserting replay order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    /// A create call.
    Create {
        /// Collection addressed.
        collection: String,
    },
    /// An update call.
    Update {
        /// Collection addressed.
        collection: String,
        /// Record addressed.
        record_id: String,
    },
    /// A delete call.
    Delete {
        /// Collection addressed.
        collection: String,
        /// Record addressed.
        record_id: String,
    },
    /// A list call.
    List {
        /// Collection addressed.
        collection: String,
    },
}

/// Mock remote document store.
///
/// Clones share state, so a test can keep a handle for inspection while
/// the coordinator owns another.
#[derive(Debug, Default)]
pub struct MockRemote {
    inner: Arc<Mutex<MockRemoteInner>>,
}

#[derive(Debug)]
struct MockRemoteInner {
    reachable: bool,
    collections: HashMap<String, BTreeMap<String, Value>>,
    next_id: u64,
    calls: Vec<RemoteCall>,
    fail_queue: VecDeque<Option<RemoteError>>,
}

impl Default for MockRemoteInner {
    fn default() -> Self {
        Self {
            reachable: true,
            collections: HashMap::new(),
            next_id: 1,
            calls: Vec::new(),
            fail_queue: VecDeque::new(),
        }
    }
}

impl MockRemote {
    /// Create a new, reachable, empty mock remote.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `Unreachable` until set reachable again.
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.lock().unwrap().reachable = reachable;
    }

    /// Queue an error for the next call; subsequent calls behave normally.
    pub fn fail_next(&self, error: RemoteError) {
        self.inner.lock().unwrap().fail_queue.push_back(Some(error));
    }

    /// Let the next `n - 1` calls through, then fail the `n`th. Simulates
    /// connectivity flapping partway through a replay.
    pub fn fail_nth(&self, n: usize, error: RemoteError) {
        let mut inner = self.inner.lock().unwrap();
        for _ in 1..n {
            inner.fail_queue.push_back(None);
        }
        inner.fail_queue.push_back(Some(error));
    }

    /// All calls made so far, in order.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    /// Insert a record directly, without recording a call. Test seeding.
    pub fn seed(&self, collection: &str, record_id: &str, fields: Value) {
        self.inner
            .lock()
            .unwrap()
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(record_id.to_string(), fields);
    }

    /// Remove a record directly, without recording a call. Simulates a
    /// concurrent deletion from another device.
    pub fn evict(&self, collection: &str, record_id: &str) {
        if let Some(records) = self.inner.lock().unwrap().collections.get_mut(collection) {
            records.remove(record_id);
        }
    }

    /// Fields of a stored record, if present.
    pub fn record(&self, collection: &str, record_id: &str) -> Option<Value> {
        self.inner
            .lock()
            .unwrap()
            .collections
            .get(collection)
            .and_then(|records| records.get(record_id))
            .cloned()
    }

    /// Whether a record exists.
    pub fn contains(&self, collection: &str, record_id: &str) -> bool {
        self.record(collection, record_id).is_some()
    }

    /// Number of records in a collection.
    pub fn record_count(&self, collection: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .collections
            .get(collection)
            .map(|records| records.len())
            .unwrap_or(0)
    }

    /// Check for injected failures before performing an operation.
    fn gate(inner: &mut MockRemoteInner) -> Result<(), RemoteError> {
        if let Some(Some(error)) = inner.fail_queue.pop_front() {
            return Err(error);
        }
        if !inner.reachable {
            return Err(RemoteError::Unreachable("mock remote unreachable".into()));
        }
        Ok(())
    }
}

impl Clone for MockRemote {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl RemoteStore for MockRemote {
    async fn create(&self, collection: &str, payload: &Value) -> Result<Record, RemoteError> {
        let mut inner = self.inner.lock().unwrap();
        Self::gate(&mut inner)?;
        inner.calls.push(RemoteCall::Create {
            collection: collection.to_string(),
        });

        let record_id = format!("r{}", inner.next_id);
        inner.next_id += 1;
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(record_id.clone(), payload.clone());

        Ok(Record::synced(RecordId::remote(record_id), payload.clone()))
    }

    async fn update(
        &self,
        collection: &str,
        record_id: &str,
        payload: &Value,
    ) -> Result<Record, RemoteError> {
        let mut inner = self.inner.lock().unwrap();
        Self::gate(&mut inner)?;
        inner.calls.push(RemoteCall::Update {
            collection: collection.to_string(),
            record_id: record_id.to_string(),
        });

        let records = inner
            .collections
            .entry(collection.to_string())
            .or_default();
        let existing = records
            .get(record_id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound {
                collection: collection.to_string(),
                record_id: record_id.to_string(),
            })?;

        let merged = merge_fields(existing, payload);
        records.insert(record_id.to_string(), merged.clone());

        Ok(Record::synced(RecordId::remote(record_id), merged))
    }

    async fn delete(&self, collection: &str, record_id: &str) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock().unwrap();
        Self::gate(&mut inner)?;
        inner.calls.push(RemoteCall::Delete {
            collection: collection.to_string(),
            record_id: record_id.to_string(),
        });

        let removed = inner
            .collections
            .get_mut(collection)
            .and_then(|records| records.remove(record_id));
        match removed {
            Some(_) => Ok(()),
            None => Err(RemoteError::NotFound {
                collection: collection.to_string(),
                record_id: record_id.to_string(),
            }),
        }
    }

    async fn list(
        &self,
        collection: &str,
        filter: Option<&Filter>,
    ) -> Result<Vec<Record>, RemoteError> {
        let mut inner = self.inner.lock().unwrap();
        Self::gate(&mut inner)?;
        inner.calls.push(RemoteCall::List {
            collection: collection.to_string(),
        });

        let records = inner
            .collections
            .get(collection)
            .map(|records| {
                records
                    .iter()
                    .map(|(id, fields)| Record::synced(RecordId::remote(id), fields.clone()))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        Ok(match filter {
            Some(filter) => records
                .into_iter()
                .filter(|record| filter.matches(record))
                .collect(),
            None => records,
        })
    }
}
