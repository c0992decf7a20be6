//! Error types for the synchronization pipeline
//!
//! Per-entry fetch failures never surface as `SyncError`; they are recorded in
//! the failure ledger. `SyncError` covers what aborts a run: unreadable
//! snapshots, storage failures outside a single entry, and transport setup.

use std::path::PathBuf;

use thiserror::Error;

use crate::domain::update_state::IllegalTransition;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse table {path}: {message}")]
    TableParse { path: PathBuf, message: String },

    #[error("Failed to write table {path}: {message}")]
    TableWrite { path: PathBuf, message: String },

    #[error("Failed to initialise document transport: {0}")]
    TransportInit(String),

    #[error("Invalid URL template '{template}': {reason}")]
    InvalidUrlTemplate { template: String, reason: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),

    #[error("Failed to serialize run report: {0}")]
    Report(#[from] serde_json::Error),
}

impl SyncError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn table_parse(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::TableParse {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub fn table_write(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::TableWrite {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

/// Failure of a single request at the transport level
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Connection to {url} failed: {message}")]
    Connection { url: String, message: String },

    #[error("Failed to read body from {url}: {message}")]
    Body { url: String, message: String },

    #[error("Request to {url} failed: {message}")]
    Other { url: String, message: String },
}

pub type SyncResult<T> = Result<T, SyncError>;
