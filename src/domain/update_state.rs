//! # Update State Machine
//!
//! Explicit per-id state for the rename-then-replace protocol. The filesystem
//! is the durable projection of this map, not its source of truth.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::catalog::CanonicalId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum UpdateState {
    #[default]
    Unchanged,
    PendingUpdate,
    /// Prior artifact moved to its `_old` sibling, replacement in flight
    Updating,
    Updated,
    /// Replacement missing; the `_old` sibling stays as a fallback
    UpdateFailed,
}

impl UpdateState {
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Unchanged, Self::PendingUpdate)
                | (Self::PendingUpdate, Self::Updating)
                | (Self::Updating, Self::Updated | Self::UpdateFailed)
        )
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Updated | Self::UpdateFailed)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("illegal update transition for '{id}': {from:?} -> {to:?}")]
pub struct IllegalTransition {
    pub id: CanonicalId,
    pub from: UpdateState,
    pub to: UpdateState,
}

/// Id-keyed state map for one partition and one run
#[derive(Debug, Clone, Default)]
pub struct UpdateTracker {
    states: HashMap<CanonicalId, UpdateState>,
}

impl UpdateTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self, id: &CanonicalId) -> UpdateState {
        self.states.get(id).copied().unwrap_or_default()
    }

    pub fn advance(&mut self, id: &CanonicalId, next: UpdateState) -> Result<(), IllegalTransition> {
        let current = self.state(id);
        if !current.can_transition_to(next) {
            return Err(IllegalTransition {
                id: id.clone(),
                from: current,
                to: next,
            });
        }
        self.states.insert(id.clone(), next);
        Ok(())
    }

    /// Ids currently in `state`, sorted
    #[must_use]
    pub fn ids_in(&self, state: UpdateState) -> Vec<CanonicalId> {
        let mut ids: Vec<CanonicalId> = self
            .states
            .iter()
            .filter(|(_, s)| **s == state)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    #[must_use]
    pub fn count(&self, state: UpdateState) -> usize {
        self.states.values().filter(|s| **s == state).count()
    }

    /// Ordered view of every tracked id, for reporting
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<CanonicalId, UpdateState> {
        self.states.iter().map(|(id, s)| (id.clone(), *s)).collect()
    }
}
