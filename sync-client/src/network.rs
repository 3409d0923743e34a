//! Connectivity monitoring.
//!
//! [`NetworkMonitor`] caches the last observed reachability of the remote
//! store and fans transitions out to subscribers. State reads are a
//! lock-free atomic load; platform integrations (OS reachability callbacks,
//! an app-lifecycle hook) feed observations in via [`NetworkMonitor::set_state`].
//!
//! The monitor itself never fails: anything it cannot determine resolves
//! to Offline, preferring queueing over risking a failed round trip on
//! flaky connectivity.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use sync_types::NetworkState;
use tokio::sync::broadcast;

/// Channel capacity for transition fan-out. A subscriber that falls
/// further behind than this sees a `Lagged` error and resynchronizes from
/// the cached state; it never stalls the monitor or other subscribers.
const TRANSITION_CHANNEL_CAPACITY: usize = 16;

/// An active connectivity check.
///
/// Implementations ping whatever endpoint proves the remote store is
/// reachable. Used when an operation result is ambiguous, e.g. a timeout
/// that could be either offline or a slow remote.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Returns true if the remote store is reachable.
    async fn check(&self) -> std::io::Result<bool>;
}

/// Tracks reachability of the remote store.
///
/// Cloning is cheap and clones share state, so the coordinator and the
/// platform integration can hold the same monitor.
#[derive(Clone)]
pub struct NetworkMonitor {
    online: Arc<AtomicBool>,
    transitions: broadcast::Sender<NetworkState>,
    probe: Option<Arc<dyn ConnectivityProbe>>,
}

impl NetworkMonitor {
    /// Create a monitor with the given initial state and no active probe.
    pub fn new(initial: NetworkState) -> Self {
        let (transitions, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        Self {
            online: Arc::new(AtomicBool::new(initial.is_online())),
            transitions,
            probe: None,
        }
    }

    /// Create a monitor that can actively re-check connectivity.
    pub fn with_probe(initial: NetworkState, probe: Arc<dyn ConnectivityProbe>) -> Self {
        let mut monitor = Self::new(initial);
        monitor.probe = Some(probe);
        monitor
    }

    /// The last observed state. Lock-free; never probes.
    pub fn current_state(&self) -> NetworkState {
        if self.online.load(Ordering::SeqCst) {
            NetworkState::Online
        } else {
            NetworkState::Offline
        }
    }

    /// Record an observed state.
    ///
    /// Only transitions are broadcast; repeated observations of the same
    /// state are deduplicated. Infallible: a send with no subscribers is
    /// fine.
    pub fn set_state(&self, state: NetworkState) {
        let was_online = self.online.swap(state.is_online(), Ordering::SeqCst);
        if was_online != state.is_online() {
            tracing::info!(%state, "connectivity transition");
            let _ = self.transitions.send(state);
        }
    }

    /// Subscribe to connectivity transitions.
    ///
    /// Each receiver gets exactly one delivery per observed transition.
    /// Receivers are independent; dropping one unsubscribes it without
    /// affecting the others.
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkState> {
        self.transitions.subscribe()
    }

    /// Actively re-check connectivity and update the cached state.
    ///
    /// Any probe error resolves to Offline (fail-safe). Without a
    /// configured probe this returns the cached state unchanged.
    pub async fn probe(&self) -> NetworkState {
        let probe = match &self.probe {
            Some(probe) => probe,
            None => return self.current_state(),
        };

        let state = match probe.check().await {
            Ok(true) => NetworkState::Online,
            Ok(false) => NetworkState::Offline,
            Err(error) => {
                tracing::debug!(%error, "connectivity probe failed, assuming offline");
                NetworkState::Offline
            }
        };
        self.set_state(state);
        state
    }
}
