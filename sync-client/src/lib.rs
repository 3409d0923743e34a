//! # sync-client
//!
//! The I/O layer of the Satchel offline-first sync core.
//!
//! This crate ties the pure rules in `sync-core` to the real world:
//!
//! - [`SyncCoordinator`] - the single entry point for reads and writes;
//!   tries the remote store when online, queues when it cannot
//! - [`NetworkMonitor`] - cached connectivity with transition fan-out
//! - [`SqliteStore`] - one sqlite database holding both the read cache
//!   ([`LocalStore`]) and the durable pending-action queue ([`ActionLog`])
//! - [`RemoteStore`] - the trait the product's remote document store is
//!   consumed through, with [`MockRemote`] for tests
//!
//! ## Example
//!
//! ```no_run
//! use satchel_sync_client::{
//!     MockRemote, NetworkMonitor, SqliteStore, SyncConfig, SyncCoordinator,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//! use sync_types::NetworkState;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let remote = Arc::new(MockRemote::new());
//! let store = Arc::new(SqliteStore::open("sync.db".as_ref()).await?);
//! let monitor = NetworkMonitor::new(NetworkState::Offline);
//!
//! let coordinator = SyncCoordinator::new(remote, store, monitor.clone(), SyncConfig::new());
//! coordinator.start();
//!
//! // Works offline: the write is queued and served optimistically.
//! let student = coordinator.create("students", json!({"name": "Amina"})).await?;
//! assert!(student.id.is_local());
//!
//! // Connectivity returns; the queue drains in the background.
//! monitor.set_state(NetworkState::Online);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod coordinator;
pub mod network;
pub mod remote;
pub mod store;

pub use coordinator::{SyncConfig, SyncCoordinator, SyncError};
pub use network::{ConnectivityProbe, NetworkMonitor};
pub use remote::{MockRemote, RemoteCall, RemoteError, RemoteStore};
pub use store::{ActionLog, LocalStore, SqliteStore, StoreError, SyncStore};
