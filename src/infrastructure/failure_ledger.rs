//! # Failure Ledger
//!
//! Durable home of the pending transient queue (one CSV per partition) and
//! the permanent list (`not_found_urls.csv`). Every operation takes the same
//! async lock and re-reads the persisted file, so concurrent fetch workers
//! append one at a time and a restarted process sees exactly what was written.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::atomic_file;
use super::layout::StorageLayout;
use super::sync_error::{SyncError, SyncResult};
use crate::domain::catalog::{CanonicalId, StatusPartition};
use crate::domain::failure::{FailureKind, FailureRecord, PermanentReason};

#[derive(Debug, Serialize, Deserialize)]
struct PendingRow {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Status")]
    status: String,
    #[serde(rename = "Url")]
    url: String,
    #[serde(rename = "Strikes", default)]
    strikes: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PermanentRow {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Status")]
    status: String,
    #[serde(rename = "Url")]
    url: String,
    #[serde(rename = "Reason", default)]
    reason: Option<PermanentReason>,
}

pub struct FailureLedger {
    layout: StorageLayout,
    lock: Mutex<()>,
}

impl FailureLedger {
    #[must_use]
    pub fn new(layout: StorageLayout) -> Self {
        Self {
            layout,
            lock: Mutex::new(()),
        }
    }

    pub async fn is_permanent(&self, id: &CanonicalId) -> SyncResult<bool> {
        let _guard = self.lock.lock().await;
        Ok(self
            .read_permanent()
            .await?
            .iter()
            .any(|r| &r.canonical_id == id))
    }

    pub async fn permanent(&self) -> SyncResult<Vec<FailureRecord>> {
        let _guard = self.lock.lock().await;
        self.read_permanent().await
    }

    pub async fn permanent_ids(&self) -> SyncResult<HashSet<CanonicalId>> {
        Ok(self
            .permanent()
            .await?
            .into_iter()
            .map(|r| r.canonical_id)
            .collect())
    }

    /// Adds `record` to the permanent list unless its id is already there, and
    /// drops the id from its partition's pending queue.
    ///
    /// Returns `false` when the id was already permanent.
    pub async fn record_permanent(&self, record: FailureRecord) -> SyncResult<bool> {
        let _guard = self.lock.lock().await;
        let mut permanent = self.read_permanent().await?;
        let added = if permanent.iter().any(|r| r.canonical_id == record.canonical_id) {
            false
        } else {
            info!("Recording {} as permanently unavailable: {}", record.canonical_id, record.url);
            permanent.push(record.clone());
            self.write_permanent(&permanent).await?;
            true
        };

        let mut pending = self.read_pending(record.status).await?;
        let before = pending.len();
        pending.retain(|r| r.canonical_id != record.canonical_id);
        if pending.len() != before {
            self.write_pending(record.status, &pending).await?;
        }
        Ok(added)
    }

    /// Queues `record` for a later drain cycle.
    ///
    /// An id already pending keeps its strike count; permanent ids are never
    /// queued. Returns whether the queue changed.
    pub async fn record_transient(&self, record: FailureRecord) -> SyncResult<bool> {
        let _guard = self.lock.lock().await;
        if self
            .read_permanent()
            .await?
            .iter()
            .any(|r| r.canonical_id == record.canonical_id)
        {
            return Ok(false);
        }

        let mut pending = self.read_pending(record.status).await?;
        if let Some(existing) = pending.iter_mut().find(|r| r.canonical_id == record.canonical_id) {
            if existing.url == record.url {
                return Ok(false);
            }
            existing.url = record.url;
        } else {
            debug!("Queueing {} for retry", record.canonical_id);
            pending.push(record.clone());
        }
        self.write_pending(record.status, &pending).await?;
        Ok(true)
    }

    pub async fn pending(&self, partition: StatusPartition) -> SyncResult<Vec<FailureRecord>> {
        let _guard = self.lock.lock().await;
        self.read_pending(partition).await
    }

    /// Overwrites the pending queue; an empty list deletes the file.
    pub async fn replace_pending(&self, partition: StatusPartition, records: &[FailureRecord]) -> SyncResult<()> {
        let _guard = self.lock.lock().await;
        self.write_pending(partition, records).await
    }

    async fn read_pending(&self, partition: StatusPartition) -> SyncResult<Vec<FailureRecord>> {
        let path = self.layout.failed_queue_path(partition);
        let rows: Vec<PendingRow> = read_rows(&path).await?;
        rows.into_iter()
            .map(|row| {
                let status = parse_status(&path, &row.status)?;
                let mut record = FailureRecord::transient(CanonicalId::new(row.name), status, row.url);
                record.strikes = row.strikes.unwrap_or(0);
                Ok(record)
            })
            .collect()
    }

    async fn write_pending(&self, partition: StatusPartition, records: &[FailureRecord]) -> SyncResult<()> {
        let path = self.layout.failed_queue_path(partition);
        if records.is_empty() {
            if atomic_file::remove_if_exists(&path).await? {
                info!("No pending {partition} failures left, removed {}", path.display());
            }
            return Ok(());
        }
        let rows = records.iter().map(|r| PendingRow {
            name: r.canonical_id.to_string(),
            status: r.status.as_str().to_string(),
            url: r.url.clone(),
            strikes: Some(r.strikes),
        });
        write_rows(&path, rows).await
    }

    async fn read_permanent(&self) -> SyncResult<Vec<FailureRecord>> {
        let path = self.layout.not_found_path();
        let rows: Vec<PermanentRow> = read_rows(&path).await?;
        rows.into_iter()
            .map(|row| {
                let status = parse_status(&path, &row.status)?;
                Ok(FailureRecord::permanent(
                    CanonicalId::new(row.name),
                    status,
                    row.url,
                    row.reason.unwrap_or_default(),
                ))
            })
            .collect()
    }

    async fn write_permanent(&self, records: &[FailureRecord]) -> SyncResult<()> {
        let rows = records
            .iter()
            .filter(|r| r.kind == FailureKind::Permanent)
            .map(|r| PermanentRow {
                name: r.canonical_id.to_string(),
                status: r.status.as_str().to_string(),
                url: r.url.clone(),
                reason: Some(r.reason.unwrap_or_default()),
            });
        write_rows(&self.layout.not_found_path(), rows).await
    }
}

fn parse_status(path: &Path, label: &str) -> SyncResult<StatusPartition> {
    StatusPartition::from_catalog_label(label)
        .ok_or_else(|| SyncError::table_parse(path, format!("unknown status '{label}'")))
}

async fn read_rows<T: for<'de> Deserialize<'de>>(path: &Path) -> SyncResult<Vec<T>> {
    let Some(bytes) = atomic_file::read_optional(path).await? else {
        return Ok(Vec::new());
    };
    let mut reader = csv::Reader::from_reader(bytes.as_slice());
    reader
        .deserialize()
        .map(|row| row.map_err(|e| SyncError::table_parse(path, e)))
        .collect()
}

async fn write_rows<T: Serialize>(path: &Path, rows: impl Iterator<Item = T>) -> SyncResult<()> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer
            .serialize(row)
            .map_err(|e| SyncError::table_write(path, e))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| SyncError::table_write(path, e))?;
    atomic_file::write_atomic(path, &bytes).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn ledger(dir: &tempfile::TempDir) -> FailureLedger {
        FailureLedger::new(StorageLayout::new(dir.path()))
    }

    fn transient(id: &str) -> FailureRecord {
        FailureRecord::transient(CanonicalId::from(id), StatusPartition::Authorised, format!("https://host/{id}.pdf"))
    }

    fn not_found(id: &str) -> FailureRecord {
        FailureRecord::permanent(
            CanonicalId::from(id),
            StatusPartition::Authorised,
            format!("https://host/{id}.pdf"),
            PermanentReason::NotFound,
        )
    }

    #[tokio::test]
    async fn permanent_records_are_deduplicated_and_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let first = ledger(&dir);
        assert!(first.record_permanent(not_found("X")).await.unwrap());
        assert!(!first.record_permanent(not_found("X")).await.unwrap());
        drop(first);

        let reopened = ledger(&dir);
        assert_eq!(reopened.permanent().await.unwrap().len(), 1);
        assert!(reopened.is_permanent(&CanonicalId::from("X")).await.unwrap());
    }

    #[tokio::test]
    async fn permanent_ids_are_never_queued() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(&dir);
        ledger.record_transient(transient("X")).await.unwrap();
        ledger.record_permanent(not_found("X")).await.unwrap();

        assert!(ledger.pending(StatusPartition::Authorised).await.unwrap().is_empty());
        assert!(!ledger.record_transient(transient("X")).await.unwrap());
    }

    #[tokio::test]
    async fn requeueing_keeps_strikes() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(&dir);
        let mut record = transient("Druga");
        record.strikes = 3;
        ledger.replace_pending(StatusPartition::Authorised, &[record]).await.unwrap();

        assert!(!ledger.record_transient(transient("Druga")).await.unwrap());

        let pending = ledger.pending(StatusPartition::Authorised).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].strikes, 3);
    }

    #[tokio::test]
    async fn empty_pending_queue_deletes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(&dir);
        let path = StorageLayout::new(dir.path()).failed_queue_path(StatusPartition::Authorised);
        ledger.record_transient(transient("Druga")).await.unwrap();
        assert!(path.exists());

        ledger.replace_pending(StatusPartition::Authorised, &[]).await.unwrap();

        assert!(!path.exists());
    }

    #[tokio::test]
    async fn loads_files_written_without_extra_columns() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path());
        tokio::fs::write(layout.not_found_path(), "Name,Status,Url\nX,Withdrawn,https://host/x.pdf\n")
            .await
            .unwrap();

        let permanent = ledger(&dir).permanent().await.unwrap();
        assert_eq!(permanent[0].reason, Some(PermanentReason::NotFound));
        assert_eq!(permanent[0].status, StatusPartition::Withdrawn);
    }

    #[tokio::test]
    async fn concurrent_appends_keep_every_record() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(ledger(&dir));
        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let ledger = Arc::clone(&ledger);
                tokio::spawn(async move { ledger.record_transient(transient(&format!("Drug{i}"))).await })
            })
            .collect();
        for task in futures::future::join_all(tasks).await {
            task.unwrap().unwrap();
        }

        assert_eq!(ledger.pending(StatusPartition::Authorised).await.unwrap().len(), 16);
    }
}
