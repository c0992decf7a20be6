//! Domain module - catalog entities and the pure parts of the sync pipeline
//!
//! Nothing here touches the filesystem or the network.

pub mod canonical_name;
pub mod catalog;
pub mod failure;
pub mod retry_policy;
pub mod revision_diff;
pub mod update_state;

pub use canonical_name::{normalize, slug};
pub use catalog::{CanonicalId, CatalogEntry, CatalogSnapshots, RawCatalogRow, Snapshot, StatusPartition, build_snapshots};
pub use failure::{FailureKind, FailureRecord, FetchOutcome, PermanentReason, ResponseClass};
pub use retry_policy::RetryPolicy;
pub use revision_diff::{RevisionDiff, diff};
pub use update_state::{IllegalTransition, UpdateState, UpdateTracker};
