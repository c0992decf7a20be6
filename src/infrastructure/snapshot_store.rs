//! # Snapshot Store
//!
//! Reads and writes catalog snapshots as CSV tables. Saving archives the
//! previous snapshot to a dated sibling first; history is never overwritten.

use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};

use super::atomic_file;
use super::sync_error::{SyncError, SyncResult};
use crate::domain::catalog::{CanonicalId, CatalogEntry, RawCatalogRow, Snapshot, StatusPartition};

/// Format of the `Generated_on` column
pub const GENERATED_ON_FORMAT: &str = "%d-%m-%Y-%H-%M-%S";

const ARCHIVE_STAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotRow {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Raw_name", default)]
    raw_name: Option<String>,
    #[serde(rename = "Revision_nb", default)]
    revision: Option<u32>,
    #[serde(rename = "Status")]
    status: String,
    #[serde(rename = "Generated_on", default)]
    generated_on: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SnapshotStore;

impl SnapshotStore {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Loads the snapshot at `path`; `Ok(None)` when no file exists.
    pub async fn load(&self, path: &Path, partition: StatusPartition) -> SyncResult<Option<Snapshot>> {
        let Some(bytes) = atomic_file::read_optional(path).await? else {
            return Ok(None);
        };

        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        let mut generated_on = None;
        let mut entries = Vec::new();
        for row in reader.deserialize::<SnapshotRow>() {
            let row = row.map_err(|e| SyncError::table_parse(path, e))?;
            let status = StatusPartition::from_catalog_label(&row.status)
                .filter(|s| *s == partition)
                .ok_or_else(|| {
                    SyncError::table_parse(
                        path,
                        format!("row '{}' has status '{}', expected {partition}", row.name, row.status),
                    )
                })?;
            if generated_on.is_none() {
                generated_on = row.generated_on.as_deref().and_then(parse_generated_on);
            }
            let raw_name = row.raw_name.unwrap_or_else(|| row.name.clone());
            let entry = CatalogEntry::new(raw_name, CanonicalId::new(row.name), row.revision.unwrap_or(0), status)
                .ok_or_else(|| SyncError::table_parse(path, "row with empty Name"))?;
            entries.push(entry);
        }

        debug!("Loaded {} entries from {}", entries.len(), path.display());
        Ok(Some(Snapshot::new(partition, generated_on, entries)))
    }

    /// Archives any existing file at `path`, then writes `snapshot` there.
    ///
    /// Returns the archive path when a previous snapshot was archived.
    pub async fn save(&self, snapshot: &Snapshot, path: &Path) -> SyncResult<Option<PathBuf>> {
        let archived = if atomic_file::exists(path).await? {
            let stamp = self
                .extract_generation_timestamp(path)
                .await
                .unwrap_or_else(|| Local::now().naive_local());
            let archive = unused_archive_path(path, stamp).await?;
            fs::copy(path, &archive)
                .await
                .map_err(|e| SyncError::io(&archive, e))?;
            info!("Archived previous snapshot to {}", archive.display());
            Some(archive)
        } else {
            None
        };

        let bytes = encode(snapshot, path)?;
        atomic_file::write_atomic(path, &bytes).await?;
        info!("Saved {} snapshot with {} entries to {}", snapshot.partition(), snapshot.len(), path.display());
        Ok(archived)
    }

    /// Generation time recorded in the snapshot itself, if readable.
    pub async fn extract_generation_timestamp(&self, path: &Path) -> Option<NaiveDateTime> {
        let bytes = atomic_file::read_optional(path).await.ok()??;
        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        let first = reader.deserialize::<SnapshotRow>().next()?.ok()?;
        first.generated_on.as_deref().and_then(parse_generated_on)
    }
}

/// Reads the catalog export produced by the spreadsheet step.
pub async fn read_catalog_export(path: &Path) -> SyncResult<Vec<RawCatalogRow>> {
    let bytes = fs::read(path).await.map_err(|e| SyncError::io(path, e))?;
    let mut reader = csv::Reader::from_reader(bytes.as_slice());
    reader
        .deserialize::<RawCatalogRow>()
        .map(|row| row.map_err(|e| SyncError::table_parse(path, e)))
        .collect()
}

fn encode(snapshot: &Snapshot, path: &Path) -> SyncResult<Vec<u8>> {
    let generated_on = snapshot
        .generated_on()
        .map(|ts| ts.format(GENERATED_ON_FORMAT).to_string());
    let mut writer = csv::Writer::from_writer(Vec::new());
    for entry in snapshot.iter() {
        writer
            .serialize(SnapshotRow {
                name: entry.canonical_id.to_string(),
                raw_name: Some(entry.raw_name.clone()),
                revision: Some(entry.revision),
                status: entry.status.as_str().to_string(),
                generated_on: generated_on.clone(),
            })
            .map_err(|e| SyncError::table_write(path, e))?;
    }
    writer.into_inner().map_err(|e| SyncError::table_write(path, e))
}

fn parse_generated_on(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value.trim(), GENERATED_ON_FORMAT).ok()
}

async fn unused_archive_path(path: &Path, stamp: NaiveDateTime) -> SyncResult<PathBuf> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot".to_string());
    let stamp = stamp.format(ARCHIVE_STAMP_FORMAT);

    let mut candidate = parent.join(format!("{stem}_{stamp}.csv"));
    let mut suffix = 1;
    while atomic_file::exists(&candidate).await? {
        candidate = parent.join(format!("{stem}_{stamp}-{suffix}.csv"));
        suffix += 1;
    }
    Ok(candidate)
}
