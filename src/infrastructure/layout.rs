//! Persisted file layout
//!
//! Every path the pipeline touches is derived from one data root carried in
//! configuration; nothing is resolved relative to the working directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::domain::catalog::{CanonicalId, StatusPartition};

const APP_DIR_NAME: &str = "rcp-mirror";

/// Which artifact of an id a path refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactSlot {
    Current,
    /// Prior version kept while its replacement is fetched
    Old,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Local data directory of the current user
    pub fn default_root() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir().context("Data directory not found")?;
        Ok(data_dir.join(APP_DIR_NAME))
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn archive_dir(&self, partition: StatusPartition) -> PathBuf {
        self.root.join(format!("archives_{}", partition.slug()))
    }

    #[must_use]
    pub fn snapshot_path(&self, partition: StatusPartition) -> PathBuf {
        self.archive_dir(partition).join("snapshot.csv")
    }

    #[must_use]
    pub fn artifact_dir(&self, partition: StatusPartition) -> PathBuf {
        self.root.join(format!("{}_rcp", partition.slug()))
    }

    #[must_use]
    pub fn artifact_path(&self, partition: StatusPartition, id: &CanonicalId, slot: ArtifactSlot) -> PathBuf {
        self.artifact_dir(partition).join(artifact_file_name(id, slot))
    }

    #[must_use]
    pub fn failed_queue_path(&self, partition: StatusPartition) -> PathBuf {
        self.root.join(format!("failed_urls_{}.csv", partition.slug()))
    }

    #[must_use]
    pub fn not_found_path(&self) -> PathBuf {
        self.root.join("not_found_urls.csv")
    }

    #[must_use]
    pub fn run_report_path(&self) -> PathBuf {
        self.root.join("last_run.json")
    }
}

#[must_use]
pub fn artifact_file_name(id: &CanonicalId, slot: ArtifactSlot) -> String {
    match slot {
        ArtifactSlot::Current => format!("{id}.pdf"),
        ArtifactSlot::Old => format!("{id}_old.pdf"),
    }
}

/// Inverse of [`artifact_file_name`]; `None` for anything else in the directory
#[must_use]
pub fn parse_artifact_file_name(name: &str) -> Option<(CanonicalId, ArtifactSlot)> {
    if name.starts_with('.') {
        return None;
    }
    let stem = name.strip_suffix(".pdf")?;
    let (id, slot) = match stem.strip_suffix("_old") {
        Some(id) => (id, ArtifactSlot::Old),
        None => (stem, ArtifactSlot::Current),
    };
    (!id.is_empty()).then(|| (CanonicalId::from(id), slot))
}
