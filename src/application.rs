//! Application layer
//!
//! Fetch engine, failure queue and update orchestrator, wired into one
//! `SyncPipeline` run.

pub mod failure_queue;
pub mod fetch_engine;
pub mod pipeline;
pub mod update_orchestrator;
pub mod url_resolver;

pub use failure_queue::{DrainSummary, FailureQueue};
pub use fetch_engine::{FetchEngine, FetchReport};
pub use pipeline::{RunReport, SyncPipeline};
pub use update_orchestrator::{PartitionOutcome, UpdateOrchestrator};
pub use url_resolver::UrlResolver;
