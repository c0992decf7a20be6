//! RCP Mirror - keeps a local mirror of product-information documents in
//! sync with the regulator's catalog.
//!
//! Each run normalizes the catalog export into per-status snapshots, diffs
//! them against the previous run by revision number, and fetches only what
//! changed or is missing. Updated documents replace their predecessor only
//! after the new copy is on disk.

pub mod application;
pub mod domain;
pub mod infrastructure;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use application::{RunReport, SyncPipeline};
pub use infrastructure::{SyncConfig, SyncError, SyncResult};
