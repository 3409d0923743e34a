//! Connectivity state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reachability of the remote store, as last observed.
///
/// Emitted by the network monitor; no other component mutates it. When
/// connectivity cannot be determined the monitor resolves to `Offline`,
/// preferring queueing over risking a failed round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkState {
    /// The remote store is believed reachable.
    Online,
    /// The remote store is unreachable or reachability is unknown.
    Offline,
}

impl NetworkState {
    /// True when the remote store is believed reachable.
    pub fn is_online(&self) -> bool {
        matches!(self, Self::Online)
    }
}

impl fmt::Display for NetworkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn online_check() {
        assert!(NetworkState::Online.is_online());
        assert!(!NetworkState::Offline.is_online());
    }

    #[test]
    fn display_is_lowercase() {
        assert_eq!(NetworkState::Online.to_string(), "online");
        assert_eq!(NetworkState::Offline.to_string(), "offline");
    }
}
