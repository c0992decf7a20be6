//! Temp-then-rename file writes
//!
//! A reader never observes a partially written file at its final path: bytes
//! go to a hidden `.part` sibling which is renamed into place once synced.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::sync_error::{SyncError, SyncResult};

pub async fn write_atomic(path: &Path, bytes: &[u8]) -> SyncResult<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .await
        .map_err(|e| SyncError::io(parent, e))?;

    let tmp_path = part_path(parent, path);
    if let Err(err) = write_and_sync(&tmp_path, bytes).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(err);
    }
    if let Err(source) = fs::rename(&tmp_path, path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(SyncError::io(path, source));
    }
    Ok(())
}

async fn write_and_sync(tmp_path: &Path, bytes: &[u8]) -> SyncResult<()> {
    let mut file = fs::File::create(tmp_path)
        .await
        .map_err(|e| SyncError::io(tmp_path, e))?;
    file.write_all(bytes)
        .await
        .map_err(|e| SyncError::io(tmp_path, e))?;
    file.sync_all().await.map_err(|e| SyncError::io(tmp_path, e))
}

fn part_path(parent: &Path, path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    parent.join(format!(".{file_name}.{}.part", Uuid::new_v4().simple()))
}

pub async fn exists(path: &Path) -> SyncResult<bool> {
    fs::try_exists(path).await.map_err(|e| SyncError::io(path, e))
}

/// Returns whether a file was removed
pub async fn remove_if_exists(path: &Path) -> SyncResult<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(SyncError::io(path, e)),
    }
}

/// Reads a file, `None` when it does not exist
pub async fn read_optional(path: &Path) -> SyncResult<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SyncError::io(path, e)),
    }
}
