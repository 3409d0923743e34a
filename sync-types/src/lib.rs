//! # sync-types
//!
//! Shared types for the Satchel offline-first sync core.
//!
//! This crate provides the foundational types used across all Satchel sync
//! crates:
//! - [`ActionId`], [`RecordId`] - Identity and ordering types
//! - [`Mutation`], [`PendingAction`] - Queued write operations
//! - [`Record`], [`Filter`] - Cached document snapshots and the narrow
//!   query shape callers use
//! - [`NetworkState`] - Connectivity as last observed

#![warn(missing_docs)]
#![warn(clippy::all)]

mod action;
mod ids;
mod network;
mod record;

pub use action::{Mutation, MutationKind, ParseMutationKindError, PendingAction};
pub use ids::{ActionId, ParseRecordIdError, RecordId};
pub use network::NetworkState;
pub use record::{Filter, Record};
