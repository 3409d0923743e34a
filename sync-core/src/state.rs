//! Drain lifecycle state machine.
//!
//! This module provides a pure, side-effect-free state machine for the
//! coordinator's drain lifecycle. The machine takes events as input and
//! produces a new state plus a list of actions to execute.
//!
//! The actual I/O (replaying the queue, emitting to subscribers) is
//! performed by sync-client, not by this module. This enables instant unit
//! testing of the transition rules.

use sync_types::{ActionId, NetworkState};

/// Coordinator drain state - NO I/O, just state transitions.
///
/// A transition to Online while Idle starts a drain; the drain task reports
/// back with [`Event::DrainFinished`], returning the machine to Idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    /// No drain in progress.
    #[default]
    Idle,
    /// A background drain task is replaying the queue.
    Draining,
}

impl SyncState {
    /// Create a new state machine in the Idle state.
    pub fn new() -> Self {
        Self::Idle
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// Pure function: the caller (sync-client) executes the returned
    /// actions.
    pub fn on_event(self, event: Event) -> (Self, Vec<Action>) {
        match (self, event) {
            // An Online transition while idle triggers a drain.
            (Self::Idle, Event::NetworkChanged(NetworkState::Online)) => {
                (Self::Draining, vec![Action::StartDrain])
            }
            (Self::Idle, Event::NetworkChanged(NetworkState::Offline)) => (Self::Idle, vec![]),

            // Connectivity changes during a drain do not interrupt it here;
            // the drain task observes transient failures itself and aborts.
            (Self::Draining, Event::NetworkChanged(_)) => (Self::Draining, vec![]),

            (Self::Draining, Event::DrainFinished(outcome)) => (
                Self::Idle,
                vec![Action::Emit(SyncEvent::DrainFinished(outcome))],
            ),

            // Stale completion from a drain we no longer track.
            (Self::Idle, Event::DrainFinished(_)) => (Self::Idle, vec![]),
        }
    }

    /// Check if a drain is currently running.
    pub fn is_draining(&self) -> bool {
        matches!(self, Self::Draining)
    }
}

/// Events fed to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The network monitor observed a transition.
    NetworkChanged(NetworkState),
    /// The background drain task finished.
    DrainFinished(DrainOutcome),
}

/// Instructions for the coordinator; the state machine performs no I/O.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Spawn the background drain task.
    StartDrain,
    /// Emit an event to subscribers.
    Emit(SyncEvent),
}

/// How a drain pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The pass ran to the end of the plan. `stalled` counts actions left
    /// queued behind a non-transient failure in their collection.
    Completed {
        /// Actions successfully replayed and removed from the queue.
        replayed: usize,
        /// Actions dropped as lost updates (target deleted remotely).
        dropped: usize,
        /// Actions left queued behind a stalled collection.
        stalled: usize,
    },
    /// Connectivity flapped mid-drain; everything not yet replayed stays
    /// queued and the next Online transition retries from the top.
    Aborted {
        /// Actions replayed before the abort.
        replayed: usize,
        /// Actions still queued.
        remaining: usize,
    },
}

impl DrainOutcome {
    /// True when every queued action was replayed or deliberately dropped.
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Completed { stalled: 0, .. })
    }
}

/// Events emitted to subscribers (UI indicators, tests).
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A mutation was appended to the durable queue.
    ActionQueued {
        /// Queue id of the action.
        id: ActionId,
        /// Collection the action targets.
        collection: String,
    },
    /// A queued mutation was successfully replayed against the remote store.
    ActionReplayed {
        /// Queue id of the action.
        id: ActionId,
        /// Collection the action targets.
        collection: String,
    },
    /// A queued mutation was dropped (lost update: the target record no
    /// longer exists remotely and no richer conflict policy is in scope).
    ActionDropped {
        /// Queue id of the action.
        id: ActionId,
        /// Collection the action targets.
        collection: String,
        /// Why the action was dropped.
        reason: String,
    },
    /// A drain pass started.
    DrainStarted {
        /// Number of actions queued at the start of the pass.
        pending: usize,
    },
    /// A drain pass finished.
    DrainFinished(DrainOutcome),
    /// A connectivity transition was observed.
    NetworkChanged(NetworkState),
}
