//! The sync coordinator: the single entry point callers use for reads and
//! writes.
//!
//! Writes try the remote store first when online; a transient failure
//! demotes the write to the durable queue instead of failing it. Reads are
//! always served from the local cache. An Offline to Online transition
//! spawns a background drain that replays the queue in per-collection
//! enqueue order.
//!
//! The drain lifecycle itself (when to start, when to report) lives in the
//! pure [`SyncState`] machine in sync-core; this module executes the
//! actions it produces.

use crate::network::NetworkMonitor;
use crate::remote::{RemoteError, RemoteStore};
use crate::store::{ActionLog, LocalStore, SyncStore};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use sync_core::{
    project, Action, DrainOutcome, DrainPlan, Event, Lane, LocalEffect, SyncEvent, SyncState,
};
use sync_types::{Filter, Mutation, NetworkState, PendingAction, Record, RecordId};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;

/// Channel capacity for the event stream. Subscribers that lag past this
/// lose the oldest events, never block the coordinator.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Deadline for a single remote call. An elapsed deadline maps to
    /// [`RemoteError::Timeout`], which is transient.
    pub remote_timeout: Duration,
    /// Name of this device, for log correlation across a household's
    /// devices. Diagnostics only.
    pub device_name: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote_timeout: Duration::from_secs(10),
            device_name: "unnamed-device".to_string(),
        }
    }
}

impl SyncConfig {
    /// Create a config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-call remote deadline.
    pub fn remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    /// Set the device name used in logs.
    pub fn device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }
}

/// Errors surfaced to callers of the coordinator.
///
/// Transient remote failures never appear here: the write path converts
/// them into a queued action and succeeds.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The local store failed. Fatal for the operation; nothing was queued.
    #[error(transparent)]
    Store(#[from] crate::store::StoreError),

    /// The remote store rejected the operation. Nothing was queued.
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// What replaying one queued action against the remote store produced.
enum Replay {
    /// Applied remotely; the action can leave the queue.
    Applied,
    /// A create applied; queued actions addressing the placeholder must be
    /// retargeted to the assigned id before the action leaves the queue.
    Created {
        /// The placeholder id the create was enqueued under.
        placeholder: RecordId,
        /// The id the remote store assigned.
        authoritative: RecordId,
    },
    /// Deliberately dropped as a lost update; the action leaves the queue.
    Dropped {
        /// Why the action was dropped.
        reason: String,
    },
    /// The remote call failed; the action stays queued.
    Failed(RemoteError),
}

/// Orchestrates the remote store, the local cache, the durable queue and
/// the network monitor.
///
/// Explicitly constructed and owned by the caller. Typical lifecycle:
/// [`SyncCoordinator::new`], [`SyncCoordinator::start`], then
/// [`SyncCoordinator::shutdown`] when the app suspends.
pub struct SyncCoordinator {
    remote: Arc<dyn RemoteStore>,
    store: Arc<dyn SyncStore>,
    monitor: NetworkMonitor,
    config: SyncConfig,
    state: Mutex<SyncState>,
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    events: broadcast::Sender<SyncEvent>,
    shutdown: Arc<Notify>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl SyncCoordinator {
    /// Create a coordinator over the given collaborators.
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        store: Arc<dyn SyncStore>,
        monitor: NetworkMonitor,
        config: SyncConfig,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            remote,
            store,
            monitor,
            config,
            state: Mutex::new(SyncState::new()),
            locks: DashMap::new(),
            events,
            shutdown: Arc::new(Notify::new()),
            watcher: Mutex::new(None),
        })
    }

    /// Spawn the background task that watches connectivity transitions and
    /// starts drains. Calling again while the watcher is alive is a no-op;
    /// after [`SyncCoordinator::shutdown`] it spawns a fresh watcher.
    pub fn start(self: &Arc<Self>) {
        let mut watcher = match self.watcher.lock() {
            Ok(watcher) => watcher,
            Err(_) => return,
        };
        if watcher.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let coordinator = Arc::clone(self);
        let shutdown = Arc::clone(&self.shutdown);
        let mut transitions = self.monitor.subscribe();

        tracing::info!(device = %self.config.device_name, "sync coordinator started");

        // Connectivity came back while nobody was watching? The initial
        // state still gets a drain on the first observed transition.
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.notified() => break,
                    received = transitions.recv() => match received {
                        Ok(state) => {
                            coordinator.emit(SyncEvent::NetworkChanged(state));
                            coordinator.apply(Event::NetworkChanged(state));
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            // Resynchronize from the cached state.
                            tracing::warn!(missed, "missed connectivity transitions");
                            let state = coordinator.monitor.current_state();
                            coordinator.apply(Event::NetworkChanged(state));
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        *watcher = Some(handle);
    }

    /// Stop the connectivity watcher. A drain already in flight runs to
    /// completion on its own task.
    pub async fn shutdown(&self) {
        self.shutdown.notify_one();
        let handle = match self.watcher.lock() {
            Ok(mut watcher) => watcher.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        tracing::info!(device = %self.config.device_name, "sync coordinator stopped");
    }

    /// Subscribe to the event stream (queueing, replays, drains).
    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// The network monitor this coordinator observes.
    pub fn monitor(&self) -> &NetworkMonitor {
        &self.monitor
    }

    // ===========================================
    // Write path
    // ===========================================

    /// Create a record.
    ///
    /// Online, the remote store assigns the authoritative id. Offline (or
    /// on a transient failure), the returned record carries a placeholder
    /// [`RecordId::Local`] and `synced: false`; the drain later swaps in
    /// the authoritative id.
    pub async fn create(&self, collection: &str, payload: Value) -> Result<Record, SyncError> {
        let lock = self.collection_lock(collection);
        let _guard = lock.lock().await;

        if self.monitor.current_state().is_online() {
            match self
                .with_deadline(self.remote.create(collection, &payload))
                .await
            {
                Ok(record) => {
                    self.store.put(collection, &record).await?;
                    return Ok(record);
                }
                Err(error) if error.is_transient() => self.demote(&error),
                Err(error) => return Err(SyncError::Remote(error)),
            }
        }

        let local_id = RecordId::local();
        let record = Record::unsynced(local_id.clone(), payload.clone());
        let mutation = Mutation::Create { local_id, payload };
        self.enqueue(collection, &mutation).await?;
        self.store.put(collection, &record).await?;
        Ok(record)
    }

    /// Update fields of a record. The payload is a patch, not a snapshot.
    ///
    /// A record still under a placeholder id is updated locally and queued
    /// even while online; its create has not been replayed yet, so there is
    /// no remote id to address.
    pub async fn update(
        &self,
        collection: &str,
        record_id: RecordId,
        payload: Value,
    ) -> Result<Record, SyncError> {
        let lock = self.collection_lock(collection);
        let _guard = lock.lock().await;

        if self.monitor.current_state().is_online() {
            if let RecordId::Remote(remote_id) = &record_id {
                match self
                    .with_deadline(self.remote.update(collection, remote_id, &payload))
                    .await
                {
                    Ok(record) => {
                        self.store.put(collection, &record).await?;
                        return Ok(record);
                    }
                    Err(error) if error.is_transient() => self.demote(&error),
                    Err(error) => return Err(SyncError::Remote(error)),
                }
            }
        }

        let existing = self.store.get(collection, &record_id).await?;
        let mutation = Mutation::Update { record_id, payload };
        let record = match project(&mutation, existing.as_ref()) {
            LocalEffect::Put(record) => record,
            // Updates always project to a snapshot; only deletes remove.
            LocalEffect::Remove(record_id) => Record::unsynced(record_id, Value::Null),
        };
        self.enqueue(collection, &mutation).await?;
        self.store.put(collection, &record).await?;
        Ok(record)
    }

    /// Delete a record. The optimistic removal makes it disappear from
    /// local reads immediately, even if the remote delete is still queued.
    pub async fn delete(&self, collection: &str, record_id: RecordId) -> Result<(), SyncError> {
        let lock = self.collection_lock(collection);
        let _guard = lock.lock().await;

        if self.monitor.current_state().is_online() {
            if let RecordId::Remote(remote_id) = &record_id {
                match self
                    .with_deadline(self.remote.delete(collection, remote_id))
                    .await
                {
                    Ok(()) => {
                        self.store.remove(collection, &record_id).await?;
                        return Ok(());
                    }
                    Err(error) if error.is_transient() => self.demote(&error),
                    Err(error) => return Err(SyncError::Remote(error)),
                }
            }
        }

        let mutation = Mutation::Delete {
            record_id: record_id.clone(),
        };
        self.enqueue(collection, &mutation).await?;
        self.store.remove(collection, &record_id).await?;
        Ok(())
    }

    // ===========================================
    // Read path
    // ===========================================

    /// Look up one record in the local cache. Never touches the network.
    pub async fn get(
        &self,
        collection: &str,
        record_id: &RecordId,
    ) -> Result<Option<Record>, SyncError> {
        Ok(self.store.get(collection, record_id).await?)
    }

    /// List cached records, optionally filtered by one field's equality.
    /// Never touches the network.
    pub async fn list(
        &self,
        collection: &str,
        filter: Option<&Filter>,
    ) -> Result<Vec<Record>, SyncError> {
        Ok(self.store.list(collection, filter).await?)
    }

    /// Mirror the remote state of a collection into the cache, then re-apply
    /// queued mutations on top so optimistic state survives the refresh.
    ///
    /// A no-op while offline or on a transient failure; callers treat
    /// freshness as best-effort.
    pub async fn refresh(&self, collection: &str) -> Result<(), SyncError> {
        if !self.monitor.current_state().is_online() {
            return Ok(());
        }

        let records = match self.with_deadline(self.remote.list(collection, None)).await {
            Ok(records) => records,
            Err(error) if error.is_transient() => {
                self.demote(&error);
                return Ok(());
            }
            Err(error) => return Err(SyncError::Remote(error)),
        };

        let lock = self.collection_lock(collection);
        let _guard = lock.lock().await;

        for stale in self.store.snapshot(collection).await? {
            self.store.remove(collection, &stale.id).await?;
        }
        for record in &records {
            self.store.put(collection, record).await?;
        }
        for action in self.store.pending().await? {
            if action.collection != collection {
                continue;
            }
            let existing = self.store.get(collection, action.mutation.target()).await?;
            match project(&action.mutation, existing.as_ref()) {
                LocalEffect::Put(record) => self.store.put(collection, &record).await?,
                LocalEffect::Remove(record_id) => {
                    self.store.remove(collection, &record_id).await?
                }
            }
        }

        tracing::debug!(collection, records = records.len(), "collection refreshed");
        Ok(())
    }

    // ===========================================
    // Queue introspection
    // ===========================================

    /// All actions awaiting replay, in enqueue order.
    pub async fn pending(&self) -> Result<Vec<PendingAction>, SyncError> {
        Ok(self.store.pending().await?)
    }

    /// Number of actions awaiting replay. Backs "pending changes" badges.
    pub async fn pending_count(&self) -> Result<u64, SyncError> {
        Ok(self.store.pending_count().await?)
    }

    /// When the queue last fully drained (unix seconds), if ever.
    pub async fn last_synced_at(&self) -> Result<Option<i64>, SyncError> {
        Ok(self.store.last_synced_at().await?)
    }

    /// Probe connectivity and start a drain if the queue has work and no
    /// drain is running. Manual pull-to-refresh hook.
    pub async fn sync_now(self: &Arc<Self>) -> NetworkState {
        let state = self.monitor.probe().await;
        self.apply(Event::NetworkChanged(state));
        state
    }

    // ===========================================
    // State machine plumbing
    // ===========================================

    /// Feed an event through the pure state machine and execute the
    /// resulting actions.
    fn apply(self: &Arc<Self>, event: Event) {
        for action in self.step(event) {
            match action {
                Action::StartDrain => {
                    let coordinator = Arc::clone(self);
                    tokio::spawn(async move {
                        coordinator.run_drain().await;
                    });
                }
                Action::Emit(event) => self.emit(event),
            }
        }
    }

    /// One synchronous machine step under the state lock.
    fn step(&self, event: Event) -> Vec<Action> {
        match self.state.lock() {
            Ok(mut state) => {
                let (next, actions) = (*state).on_event(event);
                *state = next;
                actions
            }
            Err(_) => Vec::new(),
        }
    }

    fn emit(&self, event: SyncEvent) {
        // A send with no subscribers is fine.
        let _ = self.events.send(event);
    }

    // ===========================================
    // Drain
    // ===========================================

    async fn run_drain(self: Arc<Self>) {
        let mut progress = DrainProgress::default();
        let outcome = match self.drain_once(&mut progress).await {
            Ok(outcome) => outcome,
            Err(error) => {
                // Local storage failed mid-drain. Everything not yet
                // removed stays queued for the next pass; work done before
                // the failure is still reported.
                tracing::warn!(%error, "drain hit a storage error");
                let remaining = self.store.pending_count().await.unwrap_or(0) as usize;
                DrainOutcome::Aborted {
                    replayed: progress.replayed,
                    remaining,
                }
            }
        };

        self.apply(Event::DrainFinished(outcome));

        // Writes that raced this pass stay queued; pick them up now rather
        // than waiting for the next connectivity transition.
        if outcome.is_clean() && self.monitor.current_state().is_online() {
            if let Ok(count) = self.store.pending_count().await {
                if count > 0 {
                    self.apply(Event::NetworkChanged(NetworkState::Online));
                }
            }
        }
    }

    /// Replay the whole queue once.
    ///
    /// Errors returned here are local storage failures only; remote
    /// failures are folded into the outcome.
    async fn drain_once(
        &self,
        progress: &mut DrainProgress,
    ) -> Result<DrainOutcome, crate::store::StoreError> {
        let plan = DrainPlan::build(self.store.pending().await?);
        self.emit(SyncEvent::DrainStarted { pending: plan.len() });
        tracing::info!(
            pending = plan.len(),
            lanes = plan.lanes.len(),
            "drain started"
        );

        let total = plan.len();

        for lane in plan.lanes {
            match self.drain_lane(&lane, progress).await? {
                LaneStatus::Done => {}
                LaneStatus::Stalled { left } => progress.stalled += left,
                LaneStatus::ConnectivityLost => {
                    let remaining = total - progress.replayed - progress.dropped;
                    self.monitor.set_state(NetworkState::Offline);
                    tracing::info!(
                        replayed = progress.replayed,
                        remaining,
                        "drain aborted, connectivity lost"
                    );
                    return Ok(DrainOutcome::Aborted {
                        replayed: progress.replayed,
                        remaining,
                    });
                }
            }
        }

        let outcome = DrainOutcome::Completed {
            replayed: progress.replayed,
            dropped: progress.dropped,
            stalled: progress.stalled,
        };
        if outcome.is_clean() {
            self.store
                .set_last_synced_at(Self::current_timestamp())
                .await?;
        }
        tracing::info!(
            replayed = progress.replayed,
            dropped = progress.dropped,
            stalled = progress.stalled,
            "drain finished"
        );
        Ok(outcome)
    }

    /// Replay one collection's lane in enqueue order, under that
    /// collection's lock. Counts accumulate into `progress` as each action
    /// settles, so an error partway through loses nothing already done.
    async fn drain_lane(
        &self,
        lane: &Lane,
        progress: &mut DrainProgress,
    ) -> Result<LaneStatus, crate::store::StoreError> {
        let lock = self.collection_lock(&lane.collection);
        let _guard = lock.lock().await;

        // Ids assigned by creates replayed in this pass. The durable queue
        // is retargeted as each create resolves; this map covers the stale
        // targets in the plan snapshotted before those retargets.
        let mut remap: HashMap<RecordId, RecordId> = HashMap::new();

        for (index, action) in lane.actions.iter().enumerate() {
            match self.replay(action, &remap).await? {
                Replay::Applied => {
                    self.store.remove_action(action.id).await?;
                    progress.replayed += 1;
                    self.emit(SyncEvent::ActionReplayed {
                        id: action.id,
                        collection: lane.collection.clone(),
                    });
                }
                Replay::Created {
                    placeholder,
                    authoritative,
                } => {
                    // One transaction: actions queued behind this create keep
                    // addressing it even if the pass aborts before they run.
                    self.store
                        .resolve_placeholder(
                            action.id,
                            &lane.collection,
                            &placeholder,
                            &authoritative,
                        )
                        .await?;
                    remap.insert(placeholder, authoritative);
                    progress.replayed += 1;
                    self.emit(SyncEvent::ActionReplayed {
                        id: action.id,
                        collection: lane.collection.clone(),
                    });
                }
                Replay::Dropped { reason } => {
                    tracing::warn!(
                        collection = %lane.collection,
                        id = %action.id,
                        %reason,
                        "queued action dropped"
                    );
                    self.store.remove_action(action.id).await?;
                    progress.dropped += 1;
                    self.emit(SyncEvent::ActionDropped {
                        id: action.id,
                        collection: lane.collection.clone(),
                        reason,
                    });
                }
                Replay::Failed(error) if error.is_transient() => {
                    return Ok(LaneStatus::ConnectivityLost);
                }
                Replay::Failed(error) => {
                    // This action and everything behind it stay queued.
                    tracing::warn!(
                        collection = %lane.collection,
                        id = %action.id,
                        %error,
                        "lane stalled on a rejected action"
                    );
                    return Ok(LaneStatus::Stalled {
                        left: lane.actions.len() - index,
                    });
                }
            }
        }

        Ok(LaneStatus::Done)
    }

    /// Replay a single queued action against the remote store and mirror
    /// the authoritative result into the cache.
    async fn replay(
        &self,
        action: &PendingAction,
        remap: &HashMap<RecordId, RecordId>,
    ) -> Result<Replay, crate::store::StoreError> {
        let collection = action.collection.as_str();
        match &action.mutation {
            Mutation::Create { local_id, payload } => {
                match self.with_deadline(self.remote.create(collection, payload)).await {
                    Ok(record) => {
                        // The authoritative id replaces the placeholder key.
                        // This is the only consumer-visible id change.
                        self.store.remove(collection, local_id).await?;
                        self.store.put(collection, &record).await?;
                        if record.id.is_remote() {
                            Ok(Replay::Created {
                                placeholder: local_id.clone(),
                                authoritative: record.id.clone(),
                            })
                        } else {
                            Ok(Replay::Applied)
                        }
                    }
                    Err(error) => Ok(Replay::Failed(error)),
                }
            }
            Mutation::Update { record_id, payload } => {
                let target = Self::resolve(record_id, remap);
                let remote_id = match &target {
                    RecordId::Remote(id) => id.clone(),
                    RecordId::Local(_) => {
                        // No authoritative id exists for this target, so the
                        // update has nothing to land on.
                        self.store.remove(collection, &target).await?;
                        return Ok(Replay::Dropped {
                            reason: "target was never created remotely".to_string(),
                        });
                    }
                };
                match self
                    .with_deadline(self.remote.update(collection, &remote_id, payload))
                    .await
                {
                    Ok(record) => {
                        self.store.put(collection, &record).await?;
                        Ok(Replay::Applied)
                    }
                    Err(RemoteError::NotFound { .. }) => {
                        // Lost update: the record was deleted remotely while
                        // this change sat in the queue.
                        self.store.remove(collection, &target).await?;
                        Ok(Replay::Dropped {
                            reason: "target record deleted remotely".to_string(),
                        })
                    }
                    Err(error) => Ok(Replay::Failed(error)),
                }
            }
            Mutation::Delete { record_id } => {
                let target = Self::resolve(record_id, remap);
                let remote_id = match &target {
                    RecordId::Remote(id) => id.clone(),
                    RecordId::Local(_) => {
                        // Never existed remotely; removing the local entry
                        // completes the intent.
                        self.store.remove(collection, &target).await?;
                        return Ok(Replay::Applied);
                    }
                };
                match self
                    .with_deadline(self.remote.delete(collection, &remote_id))
                    .await
                {
                    // Already gone remotely is the intended end state.
                    Ok(()) | Err(RemoteError::NotFound { .. }) => {
                        self.store.remove(collection, &target).await?;
                        Ok(Replay::Applied)
                    }
                    Err(error) => Ok(Replay::Failed(error)),
                }
            }
        }
    }

    // ===========================================
    // Helpers
    // ===========================================

    /// Append to the durable queue and announce it.
    async fn enqueue(&self, collection: &str, mutation: &Mutation) -> Result<(), SyncError> {
        let action = self.store.append(collection, mutation).await?;
        tracing::debug!(
            collection,
            id = %action.id,
            kind = %mutation.kind(),
            "mutation queued for replay"
        );
        self.emit(SyncEvent::ActionQueued {
            id: action.id,
            collection: collection.to_string(),
        });
        Ok(())
    }

    /// A transient remote failure is evidence the link is down; record it
    /// so queued work drains on the next observed recovery.
    fn demote(&self, error: &RemoteError) {
        tracing::debug!(%error, "remote unreachable, demoting to the queue");
        self.monitor.set_state(NetworkState::Offline);
    }

    /// The serialization lock for one collection.
    fn collection_lock(&self, collection: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .entry(collection.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Bound a remote call by the configured deadline.
    async fn with_deadline<T>(
        &self,
        call: impl Future<Output = Result<T, RemoteError>>,
    ) -> Result<T, RemoteError> {
        match tokio::time::timeout(self.config.remote_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout),
        }
    }

    /// Swap a stale placeholder target for the authoritative id assigned
    /// earlier in this drain pass, if one exists.
    fn resolve(record_id: &RecordId, remap: &HashMap<RecordId, RecordId>) -> RecordId {
        match remap.get(record_id) {
            Some(authoritative) => authoritative.clone(),
            None => record_id.clone(),
        }
    }

    fn current_timestamp() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

/// Running counts for one drain pass. Owned by the caller of the drain so
/// the outcome reported after a storage error still reflects work done.
#[derive(Default)]
struct DrainProgress {
    replayed: usize,
    dropped: usize,
    stalled: usize,
}

/// How replaying one lane ended.
enum LaneStatus {
    /// Every action in the lane was replayed or dropped.
    Done,
    /// A rejection stalled the lane; `left` actions stay queued.
    Stalled { left: usize },
    /// A transient failure; the whole drain must abort.
    ConnectivityLost,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MockRemote, RemoteCall};
    use crate::store::{SqliteStore, StoreError};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use sync_types::ActionId;

    /// Delegates to sqlite, but `remove_action` starts failing once its
    /// budget of successful removals runs out.
    struct FlakyStore {
        inner: SqliteStore,
        removals_left: AtomicUsize,
    }

    #[async_trait]
    impl LocalStore for FlakyStore {
        async fn get(
            &self,
            collection: &str,
            record_id: &RecordId,
        ) -> Result<Option<Record>, StoreError> {
            self.inner.get(collection, record_id).await
        }

        async fn list(
            &self,
            collection: &str,
            filter: Option<&Filter>,
        ) -> Result<Vec<Record>, StoreError> {
            self.inner.list(collection, filter).await
        }

        async fn put(&self, collection: &str, record: &Record) -> Result<(), StoreError> {
            self.inner.put(collection, record).await
        }

        async fn remove(&self, collection: &str, record_id: &RecordId) -> Result<(), StoreError> {
            self.inner.remove(collection, record_id).await
        }

        async fn snapshot(&self, collection: &str) -> Result<Vec<Record>, StoreError> {
            self.inner.snapshot(collection).await
        }
    }

    #[async_trait]
    impl ActionLog for FlakyStore {
        async fn append(
            &self,
            collection: &str,
            mutation: &Mutation,
        ) -> Result<PendingAction, StoreError> {
            self.inner.append(collection, mutation).await
        }

        async fn pending(&self) -> Result<Vec<PendingAction>, StoreError> {
            self.inner.pending().await
        }

        async fn remove_action(&self, id: ActionId) -> Result<(), StoreError> {
            if self.removals_left.load(Ordering::SeqCst) == 0 {
                return Err(StoreError::Corrupt("simulated storage failure".into()));
            }
            self.removals_left.fetch_sub(1, Ordering::SeqCst);
            self.inner.remove_action(id).await
        }

        async fn resolve_placeholder(
            &self,
            id: ActionId,
            collection: &str,
            placeholder: &RecordId,
            authoritative: &RecordId,
        ) -> Result<(), StoreError> {
            self.inner
                .resolve_placeholder(id, collection, placeholder, authoritative)
                .await
        }

        async fn pending_count(&self) -> Result<u64, StoreError> {
            self.inner.pending_count().await
        }

        async fn clear(&self) -> Result<(), StoreError> {
            self.inner.clear().await
        }

        async fn last_synced_at(&self) -> Result<Option<i64>, StoreError> {
            self.inner.last_synced_at().await
        }

        async fn set_last_synced_at(&self, at: i64) -> Result<(), StoreError> {
            self.inner.set_last_synced_at(at).await
        }
    }

    async fn setup(initial: NetworkState) -> (Arc<SyncCoordinator>, MockRemote) {
        let remote = MockRemote::new();
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let monitor = NetworkMonitor::new(initial);
        let coordinator = SyncCoordinator::new(
            Arc::new(remote.clone()),
            store,
            monitor,
            SyncConfig::new().remote_timeout(Duration::from_secs(1)),
        );
        (coordinator, remote)
    }

    async fn wait_for_drain(events: &mut broadcast::Receiver<SyncEvent>) -> DrainOutcome {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("timed out waiting for drain")
                .expect("event stream closed");
            if let SyncEvent::DrainFinished(outcome) = event {
                return outcome;
            }
        }
    }

    // ===========================================
    // Write Path Tests
    // ===========================================

    #[tokio::test]
    async fn online_create_round_trips() {
        let (coordinator, remote) = setup(NetworkState::Online).await;

        let record = coordinator
            .create("students", json!({"name": "Amina"}))
            .await
            .unwrap();

        assert!(record.id.is_remote());
        assert!(record.synced);
        assert!(remote.contains("students", &record.id.to_string()));
        assert_eq!(coordinator.pending_count().await.unwrap(), 0);

        // The cache mirrors the authoritative result.
        let cached = coordinator
            .get("students", &record.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached, record);
    }

    #[tokio::test]
    async fn offline_create_queues_with_placeholder_id() {
        let (coordinator, remote) = setup(NetworkState::Offline).await;

        let record = coordinator
            .create("students", json!({"name": "Amina"}))
            .await
            .unwrap();

        assert!(record.id.is_local());
        assert!(!record.synced);
        assert_eq!(remote.record_count("students"), 0);
        assert_eq!(coordinator.pending_count().await.unwrap(), 1);

        // The optimistic snapshot is readable immediately.
        let cached = coordinator
            .get("students", &record.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached.fields, json!({"name": "Amina"}));
    }

    #[tokio::test]
    async fn timeout_demotes_write_to_queue() {
        let (coordinator, remote) = setup(NetworkState::Online).await;
        remote.seed("classes", "c1", json!({"name": "Grade 5A", "room": 12}));
        remote.fail_next(RemoteError::Timeout);

        let record = coordinator
            .update("classes", RecordId::remote("c1"), json!({"name": "Grade 5B"}))
            .await
            .unwrap();

        // The call succeeded from the caller's perspective, optimistically.
        assert!(!record.synced);
        assert_eq!(coordinator.pending_count().await.unwrap(), 1);
        // A timeout is evidence the link is down.
        assert_eq!(
            coordinator.monitor().current_state(),
            NetworkState::Offline
        );
        // The remote record is untouched.
        assert_eq!(
            remote.record("classes", "c1"),
            Some(json!({"name": "Grade 5A", "room": 12}))
        );
    }

    #[tokio::test]
    async fn offline_update_overlays_cached_snapshot() {
        let (coordinator, _remote) = setup(NetworkState::Offline).await;
        let id = RecordId::remote("c1");
        coordinator
            .store
            .put(
                "classes",
                &Record::synced(id.clone(), json!({"name": "Grade 5A", "room": 12})),
            )
            .await
            .unwrap();

        let record = coordinator
            .update("classes", id, json!({"name": "Grade 5B"}))
            .await
            .unwrap();

        assert_eq!(record.fields, json!({"name": "Grade 5B", "room": 12}));
        assert!(!record.synced);
    }

    #[tokio::test]
    async fn rejection_propagates_without_queueing() {
        let (coordinator, remote) = setup(NetworkState::Online).await;
        remote.fail_next(RemoteError::Rejected {
            reason: "name required".into(),
        });

        let result = coordinator.create("students", json!({})).await;

        assert!(matches!(
            result,
            Err(SyncError::Remote(RemoteError::Rejected { .. }))
        ));
        assert_eq!(coordinator.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn offline_delete_removes_from_cache_and_queues() {
        let (coordinator, _remote) = setup(NetworkState::Offline).await;
        let id = RecordId::remote("s1");
        coordinator
            .store
            .put("students", &Record::synced(id.clone(), json!({"n": 1})))
            .await
            .unwrap();

        coordinator.delete("students", id.clone()).await.unwrap();

        assert_eq!(coordinator.get("students", &id).await.unwrap(), None);
        assert_eq!(coordinator.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn online_update_of_placeholder_record_stays_local() {
        let (coordinator, remote) = setup(NetworkState::Offline).await;
        let record = coordinator
            .create("students", json!({"name": "Amina"}))
            .await
            .unwrap();

        // Connectivity returns, but the create has not been replayed.
        coordinator.monitor().set_state(NetworkState::Online);
        let updated = coordinator
            .update("students", record.id.clone(), json!({"grade": 5}))
            .await
            .unwrap();

        assert!(!updated.synced);
        assert_eq!(updated.fields, json!({"name": "Amina", "grade": 5}));
        assert_eq!(coordinator.pending_count().await.unwrap(), 2);
        // No remote call was attempted for the placeholder.
        assert!(remote.calls().is_empty());
    }

    // ===========================================
    // Drain Tests
    // ===========================================

    #[tokio::test]
    async fn reconnect_drains_the_queue() {
        let (coordinator, remote) = setup(NetworkState::Offline).await;
        remote.seed("classes", "c1", json!({"name": "Grade 5A"}));

        coordinator
            .update("classes", RecordId::remote("c1"), json!({"name": "Grade 5B"}))
            .await
            .unwrap();

        coordinator.start();
        let mut events = coordinator.subscribe_events();
        coordinator.monitor().set_state(NetworkState::Online);

        let outcome = wait_for_drain(&mut events).await;
        assert_eq!(
            outcome,
            DrainOutcome::Completed {
                replayed: 1,
                dropped: 0,
                stalled: 0
            }
        );
        assert_eq!(coordinator.pending_count().await.unwrap(), 0);
        assert_eq!(
            remote.record("classes", "c1"),
            Some(json!({"name": "Grade 5B"}))
        );
        assert!(coordinator.last_synced_at().await.unwrap().is_some());
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn drain_swaps_placeholder_for_authoritative_id() {
        let (coordinator, remote) = setup(NetworkState::Offline).await;

        let record = coordinator
            .create("students", json!({"name": "Amina"}))
            .await
            .unwrap();
        let placeholder = record.id.clone();

        coordinator.start();
        let mut events = coordinator.subscribe_events();
        coordinator.monitor().set_state(NetworkState::Online);
        let outcome = wait_for_drain(&mut events).await;
        assert!(outcome.is_clean());

        // The placeholder key is gone; the authoritative entry carries the
        // same fields.
        assert_eq!(
            coordinator.get("students", &placeholder).await.unwrap(),
            None
        );
        let all = coordinator.list("students", None).await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].id.is_remote());
        assert!(all[0].synced);
        assert_eq!(all[0].fields, json!({"name": "Amina"}));
        assert!(remote.contains("students", &all[0].id.to_string()));
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn drain_remaps_updates_queued_behind_a_create() {
        let (coordinator, remote) = setup(NetworkState::Offline).await;

        let record = coordinator
            .create("students", json!({"name": "Amina"}))
            .await
            .unwrap();
        coordinator
            .update("students", record.id.clone(), json!({"grade": 5}))
            .await
            .unwrap();

        coordinator.start();
        let mut events = coordinator.subscribe_events();
        coordinator.monitor().set_state(NetworkState::Online);
        let outcome = wait_for_drain(&mut events).await;

        assert_eq!(
            outcome,
            DrainOutcome::Completed {
                replayed: 2,
                dropped: 0,
                stalled: 0
            }
        );
        // The update landed on the id the create was assigned.
        assert_eq!(
            remote.record("students", "r1"),
            Some(json!({"name": "Amina", "grade": 5}))
        );
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn lost_update_is_dropped_and_cache_entry_removed() {
        let (coordinator, remote) = setup(NetworkState::Offline).await;
        let id = RecordId::remote("c1");
        coordinator
            .store
            .put("classes", &Record::synced(id.clone(), json!({"name": "Grade 5A"})))
            .await
            .unwrap();

        // The record was deleted remotely while this update sat queued.
        coordinator
            .update("classes", id.clone(), json!({"name": "Grade 5B"}))
            .await
            .unwrap();

        coordinator.start();
        let mut events = coordinator.subscribe_events();
        coordinator.monitor().set_state(NetworkState::Online);
        let outcome = wait_for_drain(&mut events).await;

        assert_eq!(
            outcome,
            DrainOutcome::Completed {
                replayed: 0,
                dropped: 1,
                stalled: 0
            }
        );
        assert_eq!(coordinator.get("classes", &id).await.unwrap(), None);
        assert_eq!(coordinator.pending_count().await.unwrap(), 0);
        assert!(!remote.contains("classes", "c1"));
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn delete_of_remotely_deleted_record_counts_as_success() {
        let (coordinator, _remote) = setup(NetworkState::Offline).await;

        coordinator
            .delete("classes", RecordId::remote("c1"))
            .await
            .unwrap();

        coordinator.start();
        let mut events = coordinator.subscribe_events();
        coordinator.monitor().set_state(NetworkState::Online);
        let outcome = wait_for_drain(&mut events).await;

        assert_eq!(
            outcome,
            DrainOutcome::Completed {
                replayed: 1,
                dropped: 0,
                stalled: 0
            }
        );
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn rejection_stalls_one_lane_but_not_others() {
        let (coordinator, remote) = setup(NetworkState::Offline).await;
        remote.seed("students", "s1", json!({"name": "Amina"}));

        // First queued action (classes lane) will be rejected; the students
        // lane must still drain.
        coordinator
            .update("classes", RecordId::remote("c1"), json!({"name": "x"}))
            .await
            .unwrap();
        coordinator
            .update("students", RecordId::remote("s1"), json!({"grade": 5}))
            .await
            .unwrap();
        remote.fail_next(RemoteError::Rejected {
            reason: "schema mismatch".into(),
        });

        coordinator.start();
        let mut events = coordinator.subscribe_events();
        coordinator.monitor().set_state(NetworkState::Online);
        let outcome = wait_for_drain(&mut events).await;

        assert_eq!(
            outcome,
            DrainOutcome::Completed {
                replayed: 1,
                dropped: 0,
                stalled: 1
            }
        );
        assert!(!outcome.is_clean());
        assert_eq!(coordinator.pending_count().await.unwrap(), 1);
        assert_eq!(
            remote.record("students", "s1"),
            Some(json!({"name": "Amina", "grade": 5}))
        );
        // An unclean pass does not record a full sync.
        assert_eq!(coordinator.last_synced_at().await.unwrap(), None);
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn transient_failure_aborts_the_whole_drain() {
        let (coordinator, remote) = setup(NetworkState::Offline).await;
        remote.seed("classes", "c1", json!({"name": "Grade 5A"}));

        coordinator
            .update("classes", RecordId::remote("c1"), json!({"name": "x"}))
            .await
            .unwrap();
        coordinator
            .update("classes", RecordId::remote("c1"), json!({"room": 3}))
            .await
            .unwrap();
        remote.fail_next(RemoteError::Timeout);

        coordinator.start();
        let mut events = coordinator.subscribe_events();
        coordinator.monitor().set_state(NetworkState::Online);
        let outcome = wait_for_drain(&mut events).await;

        assert_eq!(
            outcome,
            DrainOutcome::Aborted {
                replayed: 0,
                remaining: 2
            }
        );
        // Everything stays queued and the monitor reflects reality.
        assert_eq!(coordinator.pending_count().await.unwrap(), 2);
        assert_eq!(
            coordinator.monitor().current_state(),
            NetworkState::Offline
        );
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn storage_failure_mid_drain_reports_partial_progress() {
        let remote = MockRemote::new();
        remote.seed("classes", "c1", json!({"room": 1}));
        remote.seed("students", "s1", json!({"grade": 4}));
        let store = Arc::new(FlakyStore {
            inner: SqliteStore::in_memory().await.unwrap(),
            removals_left: AtomicUsize::new(1),
        });
        let monitor = NetworkMonitor::new(NetworkState::Offline);
        let coordinator = SyncCoordinator::new(
            Arc::new(remote.clone()),
            store,
            monitor,
            SyncConfig::new().remote_timeout(Duration::from_secs(1)),
        );

        coordinator
            .update("classes", RecordId::remote("c1"), json!({"room": 2}))
            .await
            .unwrap();
        coordinator
            .update("students", RecordId::remote("s1"), json!({"grade": 5}))
            .await
            .unwrap();

        coordinator.start();
        let mut events = coordinator.subscribe_events();
        coordinator.monitor().set_state(NetworkState::Online);
        let outcome = wait_for_drain(&mut events).await;

        // The first lane's replay is reported even though storage failed in
        // the second, and the unremoved action stays queued.
        assert_eq!(
            outcome,
            DrainOutcome::Aborted {
                replayed: 1,
                remaining: 1
            }
        );
        assert_eq!(coordinator.pending_count().await.unwrap(), 1);
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn repeated_start_keeps_a_single_watcher() {
        let (coordinator, remote) = setup(NetworkState::Offline).await;
        remote.seed("classes", "c1", json!({"name": "Grade 5A"}));
        coordinator
            .update("classes", RecordId::remote("c1"), json!({"name": "Grade 5B"}))
            .await
            .unwrap();

        coordinator.start();
        coordinator.start();

        let mut events = coordinator.subscribe_events();
        coordinator.monitor().set_state(NetworkState::Online);

        // A duplicate watcher would announce the same transition twice.
        let mut transitions = 0;
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("timed out waiting for drain")
                .expect("event stream closed");
            match event {
                SyncEvent::NetworkChanged(_) => transitions += 1,
                SyncEvent::DrainFinished(_) => break,
                _ => {}
            }
        }
        assert_eq!(transitions, 1);
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn empty_queue_drain_is_clean() {
        let (coordinator, _remote) = setup(NetworkState::Offline).await;

        coordinator.start();
        let mut events = coordinator.subscribe_events();
        coordinator.monitor().set_state(NetworkState::Online);
        let outcome = wait_for_drain(&mut events).await;

        assert!(outcome.is_clean());
        assert!(coordinator.last_synced_at().await.unwrap().is_some());
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn sync_now_drains_without_a_transition() {
        let (coordinator, remote) = setup(NetworkState::Offline).await;
        remote.seed("classes", "c1", json!({"name": "Grade 5A"}));
        coordinator
            .update("classes", RecordId::remote("c1"), json!({"name": "Grade 5B"}))
            .await
            .unwrap();

        // No watcher running; the caller pulls instead.
        coordinator.monitor().set_state(NetworkState::Online);
        let mut events = coordinator.subscribe_events();
        let state = coordinator.sync_now().await;
        assert_eq!(state, NetworkState::Online);

        let outcome = wait_for_drain(&mut events).await;
        assert!(outcome.is_clean());
        assert_eq!(
            remote.record("classes", "c1"),
            Some(json!({"name": "Grade 5B"}))
        );
    }

    // ===========================================
    // Read Path Tests
    // ===========================================

    #[tokio::test]
    async fn refresh_mirrors_remote_and_keeps_optimistic_state() {
        let (coordinator, remote) = setup(NetworkState::Offline).await;

        // A record queued offline must survive a refresh.
        let local = coordinator
            .create("students", json!({"name": "Amina"}))
            .await
            .unwrap();

        remote.seed("students", "s1", json!({"name": "Bilal"}));
        coordinator.monitor().set_state(NetworkState::Online);
        coordinator.refresh("students").await.unwrap();

        let all = coordinator.list("students", None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(coordinator
            .get("students", &local.id)
            .await
            .unwrap()
            .is_some());
        assert!(coordinator
            .get("students", &RecordId::remote("s1"))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn refresh_drops_records_deleted_remotely() {
        let (coordinator, remote) = setup(NetworkState::Online).await;
        let id = RecordId::remote("s1");
        coordinator
            .store
            .put("students", &Record::synced(id.clone(), json!({"n": 1})))
            .await
            .unwrap();

        // Nothing queued for it and the remote no longer has it.
        coordinator.refresh("students").await.unwrap();

        assert_eq!(coordinator.get("students", &id).await.unwrap(), None);
        assert_eq!(remote.calls(), vec![RemoteCall::List {
            collection: "students".into()
        }]);
    }

    #[tokio::test]
    async fn refresh_offline_is_a_no_op() {
        let (coordinator, remote) = setup(NetworkState::Offline).await;
        remote.seed("students", "s1", json!({"name": "Bilal"}));

        coordinator.refresh("students").await.unwrap();

        assert!(coordinator.list("students", None).await.unwrap().is_empty());
        assert!(remote.calls().is_empty());
    }
}
