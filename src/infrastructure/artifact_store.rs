//! # Artifact Store
//!
//! Storage of downloaded documents per status partition. The trait is the
//! seam the fetch engine and orchestrator work through; `LocalArtifactStore`
//! is the on-disk projection.

use std::io::ErrorKind;

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use super::atomic_file;
use super::layout::{ArtifactSlot, StorageLayout, parse_artifact_file_name};
use super::sync_error::{SyncError, SyncResult};
use crate::domain::catalog::{CanonicalId, StatusPartition};

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn exists(&self, partition: StatusPartition, id: &CanonicalId, slot: ArtifactSlot) -> SyncResult<bool>;

    /// Makes `bytes` visible as the current artifact in one step
    async fn write_current(&self, partition: StatusPartition, id: &CanonicalId, bytes: &[u8]) -> SyncResult<()>;

    /// Moves the current artifact to the old slot, replacing any lingering old
    /// one. Returns `false` when there was no current artifact.
    async fn retire_current(&self, partition: StatusPartition, id: &CanonicalId) -> SyncResult<bool>;

    /// Returns whether something was removed
    async fn remove(&self, partition: StatusPartition, id: &CanonicalId, slot: ArtifactSlot) -> SyncResult<bool>;

    /// Ids holding an artifact in `slot`, sorted
    async fn list(&self, partition: StatusPartition, slot: ArtifactSlot) -> SyncResult<Vec<CanonicalId>>;
}

#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    layout: StorageLayout,
}

impl LocalArtifactStore {
    #[must_use]
    pub const fn new(layout: StorageLayout) -> Self {
        Self { layout }
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn exists(&self, partition: StatusPartition, id: &CanonicalId, slot: ArtifactSlot) -> SyncResult<bool> {
        atomic_file::exists(&self.layout.artifact_path(partition, id, slot)).await
    }

    async fn write_current(&self, partition: StatusPartition, id: &CanonicalId, bytes: &[u8]) -> SyncResult<()> {
        let path = self.layout.artifact_path(partition, id, ArtifactSlot::Current);
        atomic_file::write_atomic(&path, bytes).await?;
        debug!("Wrote {} ({} bytes)", path.display(), bytes.len());
        Ok(())
    }

    async fn retire_current(&self, partition: StatusPartition, id: &CanonicalId) -> SyncResult<bool> {
        let current = self.layout.artifact_path(partition, id, ArtifactSlot::Current);
        if !atomic_file::exists(&current).await? {
            return Ok(false);
        }
        let old = self.layout.artifact_path(partition, id, ArtifactSlot::Old);
        // current still exists while the stale old copy goes away
        atomic_file::remove_if_exists(&old).await?;
        fs::rename(&current, &old)
            .await
            .map_err(|e| SyncError::io(&current, e))?;
        Ok(true)
    }

    async fn remove(&self, partition: StatusPartition, id: &CanonicalId, slot: ArtifactSlot) -> SyncResult<bool> {
        atomic_file::remove_if_exists(&self.layout.artifact_path(partition, id, slot)).await
    }

    async fn list(&self, partition: StatusPartition, slot: ArtifactSlot) -> SyncResult<Vec<CanonicalId>> {
        let dir = self.layout.artifact_dir(partition);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SyncError::io(&dir, e)),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| SyncError::io(&dir, e))? {
            let name = entry.file_name();
            if let Some((id, found)) = parse_artifact_file_name(&name.to_string_lossy()) {
                if found == slot {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, LocalArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(StorageLayout::new(dir.path()));
        (dir, store)
    }

    #[tokio::test]
    async fn retire_moves_current_to_old() {
        let (_dir, store) = store();
        let id = CanonicalId::from("Druga");
        let p = StatusPartition::Authorised;
        store.write_current(p, &id, b"v1").await.unwrap();

        assert!(store.retire_current(p, &id).await.unwrap());

        assert!(!store.exists(p, &id, ArtifactSlot::Current).await.unwrap());
        assert!(store.exists(p, &id, ArtifactSlot::Old).await.unwrap());
        assert!(!store.retire_current(p, &id).await.unwrap());
    }

    #[tokio::test]
    async fn retire_replaces_lingering_old_copy() {
        let (dir, store) = store();
        let id = CanonicalId::from("Druga");
        let p = StatusPartition::Authorised;
        store.write_current(p, &id, b"v1").await.unwrap();
        store.retire_current(p, &id).await.unwrap();
        store.write_current(p, &id, b"v2").await.unwrap();

        store.retire_current(p, &id).await.unwrap();

        let old = StorageLayout::new(dir.path()).artifact_path(p, &id, ArtifactSlot::Old);
        assert_eq!(fs::read(old).await.unwrap(), b"v2");
    }

    #[tokio::test]
    async fn lists_only_requested_slot() {
        let (_dir, store) = store();
        let p = StatusPartition::Withdrawn;
        for name in ["Drugb", "Druga"] {
            store.write_current(p, &CanonicalId::from(name), b"x").await.unwrap();
        }
        store.retire_current(p, &CanonicalId::from("Drugb")).await.unwrap();

        assert_eq!(store.list(p, ArtifactSlot::Current).await.unwrap(), vec![CanonicalId::from("Druga")]);
        assert_eq!(store.list(p, ArtifactSlot::Old).await.unwrap(), vec![CanonicalId::from("Drugb")]);
        assert!(store.list(StatusPartition::Authorised, ArtifactSlot::Current).await.unwrap().is_empty());
    }
}
