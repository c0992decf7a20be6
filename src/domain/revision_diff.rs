//! # Revision Diff Engine
//!
//! Compares two snapshots of the same partition by canonical id. Only the
//! revision counter is compared, never document content.

use std::collections::{HashMap, HashSet};

use super::catalog::{CanonicalId, CatalogEntry, Snapshot};

/// Result of joining an old and a new snapshot on canonical id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevisionDiff {
    /// Entries (taken from the new snapshot) whose revision changed
    pub changed: Vec<CatalogEntry>,
    /// Ids present only in the new snapshot
    pub added: Vec<CanonicalId>,
    /// Ids present only in the old snapshot
    pub removed: Vec<CanonicalId>,
}

impl RevisionDiff {
    #[must_use]
    pub fn changed_ids(&self) -> HashSet<&CanonicalId> {
        self.changed.iter().map(|e| &e.canonical_id).collect()
    }

    #[must_use]
    pub fn is_changed(&self, id: &CanonicalId) -> bool {
        self.changed.iter().any(|e| &e.canonical_id == id)
    }
}

/// Hashed inner join of `old` and `new`; linear in the snapshot sizes.
///
/// Appearance and disappearance of ids is reported separately and never
/// counts as a revision change.
#[must_use]
pub fn diff(old: &Snapshot, new: &Snapshot) -> RevisionDiff {
    let old_revisions: HashMap<&CanonicalId, u32> = old
        .iter()
        .map(|e| (&e.canonical_id, e.revision))
        .collect();

    let mut result = RevisionDiff::default();
    let mut seen = HashSet::with_capacity(new.len());
    for entry in new.iter() {
        seen.insert(&entry.canonical_id);
        match old_revisions.get(&entry.canonical_id) {
            Some(&revision) if revision != entry.revision => result.changed.push(entry.clone()),
            Some(_) => {}
            None => result.added.push(entry.canonical_id.clone()),
        }
    }
    result.removed = old
        .iter()
        .filter(|e| !seen.contains(&e.canonical_id))
        .map(|e| e.canonical_id.clone())
        .collect();
    result
}
