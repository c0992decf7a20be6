//! Infrastructure layer: filesystem persistence, HTTP transport,
//! configuration and logging.

pub mod artifact_store;
pub mod atomic_file;
pub mod config;
pub mod failure_ledger;
pub mod http_client;
pub mod layout;
pub mod logging;
pub mod snapshot_store;
pub mod sync_error;

pub use artifact_store::{ArtifactStore, LocalArtifactStore};
pub use config::{ConfigError, SyncConfig};
pub use failure_ledger::FailureLedger;
pub use http_client::{DocumentSource, FetchResponse, HttpClientConfig, HttpDocumentSource};
pub use layout::{ArtifactSlot, StorageLayout};
pub use logging::init_logging_with_config;
pub use snapshot_store::{SnapshotStore, read_catalog_export};
pub use sync_error::{SyncError, SyncResult, TransportError};
