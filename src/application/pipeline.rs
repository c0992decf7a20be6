//! One scheduled synchronization run
//!
//! catalog rows → snapshots → per-partition sync → reconciliation → report.
//! Every input path comes from the `StorageLayout`; nothing depends on the
//! working directory.
//!
//! A partition's new snapshot is saved only after its sync finished, and ids
//! whose update never started are saved with their previous revision. An
//! interrupted run or a failed rename is therefore diffed again next time.

use std::sync::Arc;

use chrono::{Local, NaiveDateTime};
use serde::Serialize;
use tracing::{info, warn};

use super::fetch_engine::FetchEngine;
use super::update_orchestrator::{PartitionOutcome, UpdateOrchestrator};
use super::url_resolver::UrlResolver;
use crate::domain::catalog::{CanonicalId, RawCatalogRow, StatusPartition, build_snapshots};
use crate::infrastructure::artifact_store::{ArtifactStore, LocalArtifactStore};
use crate::infrastructure::atomic_file;
use crate::infrastructure::config::SyncConfig;
use crate::infrastructure::failure_ledger::FailureLedger;
use crate::infrastructure::http_client::{DocumentSource, HttpDocumentSource};
use crate::infrastructure::layout::StorageLayout;
use crate::infrastructure::snapshot_store::SnapshotStore;
use crate::infrastructure::sync_error::{SyncError, SyncResult};

/// Written to `last_run.json` after every run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub generated_on: NaiveDateTime,
    pub finished_at: NaiveDateTime,
    pub catalog_rows: usize,
    pub rejected_rows: usize,
    pub partitions: Vec<PartitionOutcome>,
    pub reconciled: Vec<CanonicalId>,
    pub permanent_failures: usize,
}

impl RunReport {
    #[must_use]
    pub fn partition(&self, partition: StatusPartition) -> Option<&PartitionOutcome> {
        self.partitions.iter().find(|p| p.partition == partition)
    }
}

pub struct SyncPipeline {
    layout: StorageLayout,
    snapshots: SnapshotStore,
    ledger: Arc<FailureLedger>,
    orchestrator: UpdateOrchestrator,
}

impl SyncPipeline {
    /// Production wiring: HTTP transport and on-disk artifacts.
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        let layout = config
            .layout()
            .map_err(|e| SyncError::Configuration(e.to_string()))?;
        let source = Arc::new(HttpDocumentSource::new(&config.http)?);
        let store = Arc::new(LocalArtifactStore::new(layout.clone()));
        Self::with_collaborators(config, layout, source, store)
    }

    pub fn with_collaborators(
        config: &SyncConfig,
        layout: StorageLayout,
        source: Arc<dyn DocumentSource>,
        store: Arc<dyn ArtifactStore>,
    ) -> SyncResult<Self> {
        config
            .validate()
            .map_err(|e| SyncError::Configuration(e.to_string()))?;
        let resolver = UrlResolver::new(&config.url, &config.language)?;
        let ledger = Arc::new(FailureLedger::new(layout.clone()));
        let engine = FetchEngine::new(
            source,
            store,
            Arc::clone(&ledger),
            resolver,
            config.retry.clone(),
            config.fetch.concurrency_limit,
        );
        Ok(Self {
            layout,
            snapshots: SnapshotStore::new(),
            ledger,
            orchestrator: UpdateOrchestrator::new(Arc::new(engine), config.queue.clone()),
        })
    }

    #[must_use]
    pub const fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub async fn run(&self, rows: &[RawCatalogRow]) -> SyncResult<RunReport> {
        self.run_at(rows, Local::now().naive_local()).await
    }

    /// Runs with an explicit snapshot generation time.
    pub async fn run_at(&self, rows: &[RawCatalogRow], generated_on: NaiveDateTime) -> SyncResult<RunReport> {
        info!("Starting sync of {} catalog rows", rows.len());
        let catalog = build_snapshots(rows, generated_on);
        if catalog.rejected > 0 {
            warn!("{} catalog rows rejected during normalization", catalog.rejected);
        }

        let mut partitions = Vec::with_capacity(StatusPartition::ALL.len());
        for partition in StatusPartition::ALL {
            let path = self.layout.snapshot_path(partition);
            let previous = self.snapshots.load(&path, partition).await?;
            let current = catalog.get(partition);
            let outcome = self.orchestrator.sync_partition(previous.as_ref(), current).await?;

            let postponed = outcome.postponed();
            let rolled_back = previous
                .as_ref()
                .filter(|_| !postponed.is_empty())
                .map(|previous| {
                    warn!("{partition}: {} update(s) postponed to the next run", postponed.len());
                    current.with_revisions_from(previous, &postponed)
                });
            self.snapshots.save(rolled_back.as_ref().unwrap_or(current), &path).await?;
            partitions.push(outcome);
        }

        let reconciled = self.orchestrator.reconcile_partitions().await?;
        let report = RunReport {
            generated_on,
            finished_at: Local::now().naive_local(),
            catalog_rows: rows.len(),
            rejected_rows: catalog.rejected,
            partitions,
            reconciled,
            permanent_failures: self.ledger.permanent().await?.len(),
        };
        self.write_report(&report).await?;
        info!("Sync finished");
        Ok(report)
    }

    async fn write_report(&self, report: &RunReport) -> SyncResult<()> {
        let bytes = serde_json::to_vec_pretty(report)?;
        atomic_file::write_atomic(&self.layout.run_report_path(), &bytes).await
    }
}
