//! # sync-core
//!
//! Pure logic for the Satchel sync core (no I/O, instant tests).
//!
//! This crate implements the state machine and algorithms for offline-first
//! synchronization without any network or disk I/O:
//!
//! - [`SyncState`] - the Idle/Draining lifecycle as `on_event -> (state, actions)`
//! - [`DrainPlan`] - grouping queued actions into per-collection replay lanes
//! - [`project`] - the optimistic effect a mutation has on the local cache
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure**: same input, same output, no side
//! effects. The actual I/O (remote calls, sqlite writes) is performed by
//! `sync-client`, which interprets the actions produced here. This keeps the
//! ordering and replay rules unit-testable without mocks or async.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod plan;
pub mod projection;
pub mod state;

pub use plan::{DrainPlan, Lane};
pub use projection::{merge_fields, project, LocalEffect};
pub use state::{Action, DrainOutcome, Event, SyncEvent, SyncState};
