//! Drain planning: group queued actions into per-collection replay lanes.
//!
//! The ordering invariant lives here: within a collection, actions replay
//! in exact enqueue order; across collections no order is promised, so a
//! non-transient failure in one lane never blocks the others.

use sync_types::PendingAction;

/// The ordered replay lane for one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Lane {
    /// The collection all actions in this lane target.
    pub collection: String,
    /// Actions in enqueue order.
    pub actions: Vec<PendingAction>,
}

/// The full plan for one drain pass.
#[derive(Debug, Clone, PartialEq)]
pub struct DrainPlan {
    /// One lane per collection with queued actions, ordered by each
    /// collection's earliest action.
    pub lanes: Vec<Lane>,
}

impl DrainPlan {
    /// Build lanes from actions already in enqueue order.
    ///
    /// Grouping is stable: within a lane the input order is preserved, and
    /// lanes appear in order of their first queued action.
    pub fn build(actions: Vec<PendingAction>) -> Self {
        let mut lanes: Vec<Lane> = Vec::new();
        for action in actions {
            match lanes
                .iter_mut()
                .find(|lane| lane.collection == action.collection)
            {
                Some(lane) => lane.actions.push(action),
                None => lanes.push(Lane {
                    collection: action.collection.clone(),
                    actions: vec![action],
                }),
            }
        }
        Self { lanes }
    }

    /// Total number of actions across all lanes.
    pub fn len(&self) -> usize {
        self.lanes.iter().map(|lane| lane.actions.len()).sum()
    }

    /// True when there is nothing to replay.
    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }
}
