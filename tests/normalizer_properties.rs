//! Property tests for identifier normalization and revision diffing
use std::collections::HashSet;

use proptest::prelude::*;
use rcp_mirror::domain::canonical_name::normalize_name;
use rcp_mirror::domain::{CanonicalId, CatalogEntry, Snapshot, StatusPartition, diff, normalize, slug};

fn name_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z]{2,10}( [A-Za-z]{2,10}){0,2}"
}

fn payload_strategy() -> impl Strategy<Value = String> {
    "[a-z]{1,8}( [a-z]{1,8}){0,2}"
}

fn snapshot(revisions: &[u32]) -> Snapshot {
    Snapshot::new(
        StatusPartition::Authorised,
        None,
        revisions
            .iter()
            .enumerate()
            .filter_map(|(i, rev)| {
                let id = format!("Drug{i}");
                CatalogEntry::new(id.clone(), CanonicalId::new(id), *rev, StatusPartition::Authorised)
            })
            .collect(),
    )
}

proptest! {
    #[test]
    fn colliding_withdrawn_name_takes_previous_name_suffix(name in name_strategy(), previously in payload_strategy()) {
        let raw = format!("{name} (previously {previously})");
        let base = normalize_name(&raw).base;
        let authorised: HashSet<CanonicalId> = [CanonicalId::new(base.clone())].into_iter().collect();

        let id = normalize(&raw, StatusPartition::Withdrawn, &authorised);

        prop_assert_eq!(id.as_str(), format!("{base}-{}", slug(&previously)));
        prop_assert_ne!(id.as_str(), base.as_str());
    }

    #[test]
    fn normalization_is_deterministic(raw in any::<String>(), withdrawn in any::<bool>()) {
        let status = if withdrawn { StatusPartition::Withdrawn } else { StatusPartition::Authorised };
        let authorised: HashSet<CanonicalId> = [CanonicalId::from("Druga")].into_iter().collect();
        prop_assert_eq!(normalize(&raw, status, &authorised), normalize(&raw, status, &authorised));
    }

    #[test]
    fn ids_are_filesystem_safe(raw in any::<String>()) {
        let id = normalize(&raw, StatusPartition::Authorised, &HashSet::new());
        for forbidden in ['/', '\\', '?', '*', '<', '>', '|', '"', '\'', '(', ')', '.', ',', ';', ':'] {
            prop_assert!(!id.as_str().contains(forbidden), "{:?} contains {:?}", id, forbidden);
        }
        prop_assert!(!id.as_str().chars().any(char::is_whitespace));
    }

    #[test]
    fn identical_snapshots_have_no_changes(revisions in prop::collection::vec(0u32..50, 0..40)) {
        let old = snapshot(&revisions);
        prop_assert!(diff(&old, &old.clone()).changed.is_empty());
    }

    #[test]
    fn one_flipped_revision_is_the_only_change(
        revisions in prop::collection::vec(0u32..50, 1..40),
        pick in any::<prop::sample::Index>(),
    ) {
        let old = snapshot(&revisions);
        let mut bumped = revisions.clone();
        let index = pick.index(bumped.len());
        bumped[index] += 1;

        let result = diff(&old, &snapshot(&bumped));

        prop_assert_eq!(result.changed.len(), 1);
        prop_assert_eq!(result.changed[0].canonical_id.as_str(), format!("Drug{index}"));
        prop_assert_eq!(result.changed[0].revision, bumped[index]);
    }
}
