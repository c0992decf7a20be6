//! # Catalog Entities
//!
//! Status partitions, canonical identifiers, catalog entries and snapshots.
//! Entries are created when a snapshot is built or parsed and are immutable
//! afterwards; the next run supersedes the whole snapshot.

use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::canonical_name::normalize_unique;

/// Mutually exclusive catalog classification segmenting snapshots,
/// artifacts and failure queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StatusPartition {
    Authorised,
    Withdrawn,
}

impl StatusPartition {
    pub const ALL: [Self; 2] = [Self::Authorised, Self::Withdrawn];

    /// Label used in persisted tables
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Authorised => "Authorised",
            Self::Withdrawn => "Withdrawn",
        }
    }

    /// Lower-case form used in directory and file names
    #[must_use]
    pub const fn slug(self) -> &'static str {
        match self {
            Self::Authorised => "authorised",
            Self::Withdrawn => "withdrawn",
        }
    }

    /// Maps a catalog status label onto a partition.
    ///
    /// "Withdrawn from rolling review" belongs to the withdrawn partition; any
    /// label outside both partitions yields `None`.
    #[must_use]
    pub fn from_catalog_label(label: &str) -> Option<Self> {
        let label = label.trim();
        if label.eq_ignore_ascii_case("authorised") {
            Some(Self::Authorised)
        } else if label.eq_ignore_ascii_case("withdrawn")
            || label.eq_ignore_ascii_case("withdrawn from rolling review")
        {
            Some(Self::Withdrawn)
        } else {
            None
        }
    }
}

impl fmt::Display for StatusPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusPartition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_catalog_label(s).ok_or_else(|| format!("unknown status partition: {s}"))
    }
}

/// Normalized, filesystem-safe name used as the primary key across
/// snapshots and artifact file names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalId(String);

impl CanonicalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// An empty id comes from a degenerate catalog name and must never be fetched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for CanonicalId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CanonicalId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// One row of the catalog export, before normalization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCatalogRow {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Revision_nb", default)]
    pub revision: Option<u32>,
    #[serde(rename = "Status")]
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub raw_name: String,
    pub canonical_id: CanonicalId,
    pub revision: u32,
    pub status: StatusPartition,
}

impl CatalogEntry {
    /// Returns `None` for an empty canonical id.
    #[must_use]
    pub fn new(
        raw_name: impl Into<String>,
        canonical_id: CanonicalId,
        revision: u32,
        status: StatusPartition,
    ) -> Option<Self> {
        if canonical_id.is_empty() {
            return None;
        }
        Some(Self {
            raw_name: raw_name.into(),
            canonical_id,
            revision,
            status,
        })
    }
}

/// Full listing of one status partition at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    partition: StatusPartition,
    generated_on: Option<NaiveDateTime>,
    entries: Vec<CatalogEntry>,
}

impl Snapshot {
    #[must_use]
    pub const fn new(
        partition: StatusPartition,
        generated_on: Option<NaiveDateTime>,
        entries: Vec<CatalogEntry>,
    ) -> Self {
        Self {
            partition,
            generated_on,
            entries,
        }
    }

    #[must_use]
    pub const fn partition(&self) -> StatusPartition {
        self.partition
    }

    #[must_use]
    pub const fn generated_on(&self) -> Option<NaiveDateTime> {
        self.generated_on
    }

    #[must_use]
    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn ids(&self) -> HashSet<CanonicalId> {
        self.entries.iter().map(|e| e.canonical_id.clone()).collect()
    }

    /// Copy in which every id of `ids` carries its revision from `previous`.
    ///
    /// Ids unknown to `previous` keep their own revision.
    #[must_use]
    pub fn with_revisions_from(&self, previous: &Self, ids: &HashSet<CanonicalId>) -> Self {
        let old: HashMap<&CanonicalId, u32> = previous
            .entries
            .iter()
            .map(|e| (&e.canonical_id, e.revision))
            .collect();
        let entries = self
            .entries
            .iter()
            .map(|entry| match old.get(&entry.canonical_id) {
                Some(&revision) if ids.contains(&entry.canonical_id) => CatalogEntry {
                    revision,
                    ..entry.clone()
                },
                _ => entry.clone(),
            })
            .collect();
        Self::new(self.partition, self.generated_on, entries)
    }
}

/// The two partition snapshots produced from one catalog export
#[derive(Debug, Clone)]
pub struct CatalogSnapshots {
    pub authorised: Snapshot,
    pub withdrawn: Snapshot,
    pub rejected: usize,
}

impl CatalogSnapshots {
    #[must_use]
    pub const fn get(&self, partition: StatusPartition) -> &Snapshot {
        match partition {
            StatusPartition::Authorised => &self.authorised,
            StatusPartition::Withdrawn => &self.withdrawn,
        }
    }
}

/// Normalizes catalog rows into per-partition snapshots.
///
/// The authorised partition is built first so withdrawn names can be checked
/// against its id set. Empty ids and duplicates within a partition are
/// rejected (first occurrence wins); a collision-suffixed withdrawn id is
/// suffixed further instead.
#[must_use]
pub fn build_snapshots(rows: &[RawCatalogRow], generated_on: NaiveDateTime) -> CatalogSnapshots {
    let mut rejected = 0;
    let mut partitioned: [Vec<&RawCatalogRow>; 2] = [Vec::new(), Vec::new()];
    for row in rows {
        match StatusPartition::from_catalog_label(&row.status) {
            Some(StatusPartition::Authorised) => partitioned[0].push(row),
            Some(StatusPartition::Withdrawn) => partitioned[1].push(row),
            None => debug!("Skipping '{}' with status '{}'", row.name, row.status),
        }
    }

    let no_ids = HashSet::new();
    let authorised = build_partition(
        StatusPartition::Authorised,
        &partitioned[0],
        &no_ids,
        &mut rejected,
    );
    let authorised_ids = authorised.iter().map(|e| e.canonical_id.clone()).collect();
    let withdrawn = build_partition(
        StatusPartition::Withdrawn,
        &partitioned[1],
        &authorised_ids,
        &mut rejected,
    );

    CatalogSnapshots {
        authorised: Snapshot::new(StatusPartition::Authorised, Some(generated_on), authorised),
        withdrawn: Snapshot::new(StatusPartition::Withdrawn, Some(generated_on), withdrawn),
        rejected,
    }
}

fn build_partition(
    partition: StatusPartition,
    rows: &[&RawCatalogRow],
    authorised_ids: &HashSet<CanonicalId>,
    rejected: &mut usize,
) -> Vec<CatalogEntry> {
    let mut seen = HashSet::with_capacity(rows.len());
    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let id = normalize_unique(&row.name, partition, authorised_ids, &seen);
        let Some(entry) =
            CatalogEntry::new(row.name.clone(), id, row.revision.unwrap_or(0), partition)
        else {
            warn!("Rejecting catalog name '{}': empty identifier", row.name);
            *rejected += 1;
            continue;
        };
        if !seen.insert(entry.canonical_id.clone()) {
            warn!(
                "Rejecting catalog name '{}': identifier '{}' already used in {}",
                row.name, entry.canonical_id, partition
            );
            *rejected += 1;
            continue;
        }
        entries.push(entry);
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rstest::rstest;

    fn row(name: &str, revision: Option<u32>, status: &str) -> RawCatalogRow {
        RawCatalogRow {
            name: name.to_string(),
            revision,
            status: status.to_string(),
        }
    }

    fn stamp() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 2)
            .and_then(|d| d.and_hms_opt(6, 30, 0))
            .unwrap()
    }

    #[rstest]
    #[case("Authorised", Some(StatusPartition::Authorised))]
    #[case(" withdrawn ", Some(StatusPartition::Withdrawn))]
    #[case("Withdrawn from rolling review", Some(StatusPartition::Withdrawn))]
    #[case("Refused", None)]
    fn parses_catalog_labels(#[case] label: &str, #[case] expected: Option<StatusPartition>) {
        assert_eq!(StatusPartition::from_catalog_label(label), expected);
    }

    #[test]
    fn empty_id_is_not_an_entry() {
        assert!(CatalogEntry::new("()", CanonicalId::new(""), 1, StatusPartition::Authorised).is_none());
    }

    #[test]
    fn builds_both_partitions_and_rejects_degenerate_rows() {
        let rows = vec![
            row("Ziagen", Some(3), "Authorised"),
            row("Ziagen (previously Abacavir)", Some(1), "Withdrawn"),
            row("(in adults)", Some(1), "Authorised"),
            row("Kivexa", None, "Authorised"),
            row("Orphan", Some(2), "Refused"),
        ];

        let snapshots = build_snapshots(&rows, stamp());

        assert_eq!(snapshots.authorised.len(), 2);
        assert_eq!(snapshots.withdrawn.len(), 1);
        assert_eq!(snapshots.rejected, 1);
        assert_eq!(snapshots.withdrawn.entries()[0].canonical_id.as_str(), "Ziagen-abacavir");
        assert_eq!(snapshots.authorised.entries()[1].revision, 0);
        assert_eq!(snapshots.authorised.generated_on(), Some(stamp()));
    }

    #[test]
    fn duplicate_ids_within_a_partition_keep_the_first_row() {
        let rows = vec![
            row("Abacavir/Lamivudine Accord", Some(4), "Authorised"),
            row("Abacavir Lamivudine Accord", Some(9), "Authorised"),
        ];

        let snapshots = build_snapshots(&rows, stamp());

        assert_eq!(snapshots.authorised.len(), 1);
        assert_eq!(snapshots.authorised.entries()[0].revision, 4);
        assert_eq!(snapshots.rejected, 1);
    }

    #[test]
    fn colliding_withdrawn_rows_without_previous_name_stay_distinct() {
        let rows = vec![
            row("Ziagen", Some(3), "Authorised"),
            row("Ziagen", Some(1), "Withdrawn"),
            row("Ziagen (in children)", Some(2), "Withdrawn"),
        ];

        let snapshots = build_snapshots(&rows, stamp());

        let ids: Vec<&str> = snapshots.withdrawn.iter().map(|e| e.canonical_id.as_str()).collect();
        assert_eq!(ids, vec!["Ziagen-0", "Ziagen-0-0"]);
        assert_eq!(snapshots.rejected, 0);
    }

    #[test]
    fn postponed_ids_keep_their_previous_revision() {
        let entry = |id: &str, revision| {
            CatalogEntry::new(id, CanonicalId::from(id), revision, StatusPartition::Authorised).unwrap()
        };
        let previous = Snapshot::new(StatusPartition::Authorised, None, vec![entry("Druga", 1), entry("Drugb", 1)]);
        let current = Snapshot::new(
            StatusPartition::Authorised,
            Some(stamp()),
            vec![entry("Druga", 2), entry("Drugb", 2), entry("Drugc", 1)],
        );
        let postponed: HashSet<CanonicalId> = [CanonicalId::from("Druga"), CanonicalId::from("Drugc")].into();

        let persisted = current.with_revisions_from(&previous, &postponed);

        let revisions: Vec<u32> = persisted.iter().map(|e| e.revision).collect();
        assert_eq!(revisions, vec![1, 2, 1]);
        assert_eq!(persisted.generated_on(), Some(stamp()));
    }
}
