//! # Update Orchestrator
//!
//! Applies the rename-then-replace protocol per partition:
//!
//! 1. diff the previous and new snapshots,
//! 2. move the current artifact of every changed id to its `_old` sibling,
//! 3. fetch every entry of the new snapshot (present artifacts are skipped),
//! 4. drain the failure queue,
//! 5. drop `_old` siblings whose replacement arrived; keep the rest.
//!
//! The old artifact is the only one touched before a replacement exists, so
//! an id that had an artifact never ends up with none.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::failure_queue::{DrainSummary, FailureQueue};
use super::fetch_engine::{FetchEngine, FetchReport};
use crate::domain::catalog::{CanonicalId, Snapshot, StatusPartition};
use crate::domain::revision_diff::{RevisionDiff, diff};
use crate::domain::update_state::{UpdateState, UpdateTracker};
use crate::infrastructure::config::QueueConfig;
use crate::infrastructure::layout::ArtifactSlot;
use crate::infrastructure::sync_error::SyncResult;

/// What one partition sync did
#[derive(Debug, Clone, Serialize)]
pub struct PartitionOutcome {
    pub partition: StatusPartition,
    pub entries: usize,
    pub changed: usize,
    pub added: usize,
    pub removed: usize,
    pub downloaded: usize,
    pub not_found: usize,
    pub drain: DrainSummary,
    pub stale_old_removed: usize,
    /// Ids that left `Unchanged` this run
    pub states: BTreeMap<CanonicalId, UpdateState>,
}

impl PartitionOutcome {
    /// Changed ids whose current artifact could not be moved aside. Their
    /// update has not started and must be diffed again next run.
    #[must_use]
    pub fn postponed(&self) -> HashSet<CanonicalId> {
        self.states
            .iter()
            .filter(|(_, state)| **state == UpdateState::PendingUpdate)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

pub struct UpdateOrchestrator {
    engine: Arc<FetchEngine>,
    queue: FailureQueue,
}

impl UpdateOrchestrator {
    #[must_use]
    pub fn new(engine: Arc<FetchEngine>, queue_config: QueueConfig) -> Self {
        let queue = FailureQueue::new(Arc::clone(&engine), queue_config);
        Self { engine, queue }
    }

    pub async fn sync_partition(&self, previous: Option<&Snapshot>, current: &Snapshot) -> SyncResult<PartitionOutcome> {
        let partition = current.partition();
        let changes = previous.map_or_else(RevisionDiff::default, |old| diff(old, current));
        info!(
            "{partition}: {} entries, {} changed, {} added, {} removed",
            current.len(),
            changes.changed.len(),
            changes.added.len(),
            changes.removed.len()
        );

        let mut tracker = UpdateTracker::new();
        self.prepare(partition, &changes, &mut tracker).await?;
        let report: FetchReport = self.engine.fetch_all(current.entries()).await;
        let drain = self.queue.drain(partition).await?;
        let stale_old_removed = self.finalize(partition, &mut tracker).await?;

        let updated = tracker.count(UpdateState::Updated);
        let failed = tracker.count(UpdateState::UpdateFailed);
        if updated + failed > 0 {
            info!("{partition}: {updated} updated, {failed} update(s) failed with the old version kept");
        }

        Ok(PartitionOutcome {
            partition,
            entries: current.len(),
            changed: changes.changed.len(),
            added: changes.added.len(),
            removed: changes.removed.len(),
            downloaded: report.downloaded(),
            not_found: report.not_found(),
            drain,
            stale_old_removed,
            states: tracker.snapshot(),
        })
    }

    /// Marks changed ids and moves their current artifacts aside.
    ///
    /// A failed rename leaves the id in `PendingUpdate` with its current
    /// artifact untouched; it does not abort the batch.
    pub async fn prepare(
        &self,
        partition: StatusPartition,
        diff: &RevisionDiff,
        tracker: &mut UpdateTracker,
    ) -> SyncResult<()> {
        let store = self.engine.store();
        for entry in &diff.changed {
            let id = &entry.canonical_id;
            tracker.advance(id, UpdateState::PendingUpdate)?;
            match store.retire_current(partition, id).await {
                Ok(true) => {
                    debug!("{id}: moved current artifact aside for revision {}", entry.revision);
                    tracker.advance(id, UpdateState::Updating)?;
                }
                Ok(false) => {
                    debug!("{id}: no current artifact, fetching fresh");
                    tracker.advance(id, UpdateState::Updating)?;
                }
                Err(e) => error!("{id}: could not move current artifact aside, update postponed: {e}"),
            }
        }
        Ok(())
    }

    /// Settles every `Updating` id and clears `_old` siblings whose current
    /// artifact is present. Returns how many stale siblings were removed.
    pub async fn finalize(&self, partition: StatusPartition, tracker: &mut UpdateTracker) -> SyncResult<usize> {
        let store = self.engine.store();
        for id in tracker.ids_in(UpdateState::Updating) {
            if store.exists(partition, &id, ArtifactSlot::Current).await? {
                store.remove(partition, &id, ArtifactSlot::Old).await?;
                tracker.advance(&id, UpdateState::Updated)?;
            } else {
                warn!("{id}: replacement not fetched, keeping the previous version");
                tracker.advance(&id, UpdateState::UpdateFailed)?;
            }
        }

        let mut removed = 0;
        for id in store.list(partition, ArtifactSlot::Old).await? {
            if store.exists(partition, &id, ArtifactSlot::Current).await?
                && store.remove(partition, &id, ArtifactSlot::Old).await?
            {
                debug!("{id}: removed stale old artifact");
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// "Withdrawn wins": an id with a current artifact in both partitions
    /// loses its authorised copies. Returns the affected ids.
    pub async fn reconcile_partitions(&self) -> SyncResult<Vec<CanonicalId>> {
        let store = self.engine.store();
        let withdrawn: HashSet<CanonicalId> = store
            .list(StatusPartition::Withdrawn, ArtifactSlot::Current)
            .await?
            .into_iter()
            .collect();

        let mut reconciled = Vec::new();
        for id in store.list(StatusPartition::Authorised, ArtifactSlot::Current).await? {
            if !withdrawn.contains(&id) {
                continue;
            }
            store.remove(StatusPartition::Authorised, &id, ArtifactSlot::Current).await?;
            store.remove(StatusPartition::Authorised, &id, ArtifactSlot::Old).await?;
            info!("{id}: withdrawn, removed authorised artifact");
            reconciled.push(id);
        }
        Ok(reconciled)
    }
}
