//! # Failure Queue
//!
//! Re-drives the pending transient failures of a partition through the fetch
//! engine. Each id that is retried and still fails earns a strike; an id that
//! reaches the escalation threshold moves to the permanent list so a
//! persistently broken document cannot be retried forever.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::fetch_engine::FetchEngine;
use crate::domain::catalog::{CatalogEntry, StatusPartition};
use crate::domain::failure::FailureRecord;
use crate::infrastructure::config::QueueConfig;
use crate::infrastructure::layout::ArtifactSlot;
use crate::infrastructure::sync_error::SyncResult;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainSummary {
    pub cycles: u32,
    pub remaining: usize,
    pub escalated: usize,
}

pub struct FailureQueue {
    engine: Arc<FetchEngine>,
    config: QueueConfig,
}

impl FailureQueue {
    #[must_use]
    pub const fn new(engine: Arc<FetchEngine>, config: QueueConfig) -> Self {
        Self { engine, config }
    }

    /// Runs one drain cycle; returns whether work remains.
    pub async fn drain_until_stable(&self, partition: StatusPartition) -> SyncResult<bool> {
        Ok(self.cycle(partition).await?.0 > 0)
    }

    /// Cycles until the queue is empty, a cycle makes no progress, or the
    /// configured cycle cap is hit.
    pub async fn drain(&self, partition: StatusPartition) -> SyncResult<DrainSummary> {
        let ledger = self.engine.ledger();
        let mut summary = DrainSummary {
            remaining: ledger.pending(partition).await?.len(),
            ..DrainSummary::default()
        };

        while summary.remaining > 0 && summary.cycles < self.config.max_drain_cycles {
            let before = summary.remaining;
            let (remaining, escalated) = self.cycle(partition).await?;
            summary.cycles += 1;
            summary.remaining = remaining;
            summary.escalated += escalated;
            if remaining >= before {
                info!("{partition} failure queue made no progress, {remaining} left for the next run");
                break;
            }
        }
        if summary.remaining == 0 {
            // the absence of the file is the "nothing pending" signal
            ledger.replace_pending(partition, &[]).await?;
        }
        Ok(summary)
    }

    /// Returns (pending after the cycle, escalated this cycle)
    async fn cycle(&self, partition: StatusPartition) -> SyncResult<(usize, usize)> {
        let ledger = self.engine.ledger();
        let store = self.engine.store();

        let pending = ledger.pending(partition).await?;
        if pending.is_empty() {
            ledger.replace_pending(partition, &[]).await?;
            return Ok((0, 0));
        }
        info!("Retrying {} pending {partition} failure(s)", pending.len());

        let entries: Vec<CatalogEntry> = pending
            .iter()
            .filter_map(|r| CatalogEntry::new(r.canonical_id.as_str(), r.canonical_id.clone(), 0, r.status))
            .collect();
        let report = self.engine.fetch_all(&entries).await;
        let retried: HashSet<_> = report
            .outcomes
            .iter()
            .filter(|(_, outcome)| outcome.made_request())
            .map(|(id, _)| id.clone())
            .collect();

        let permanent = ledger.permanent_ids().await?;
        let mut remaining = Vec::new();
        let mut escalate = Vec::new();
        for mut record in ledger.pending(partition).await? {
            if permanent.contains(&record.canonical_id)
                || store
                    .exists(partition, &record.canonical_id, ArtifactSlot::Current)
                    .await?
            {
                continue;
            }
            if retried.contains(&record.canonical_id) {
                record.strikes += 1;
            }
            if record.strikes >= self.config.escalate_after_cycles {
                escalate.push(record);
            } else {
                remaining.push(record);
            }
        }

        ledger.replace_pending(partition, &remaining).await?;
        let escalated = escalate.len();
        for record in escalate {
            warn!(
                "Escalating {} to permanent after {} failed drain cycles",
                record.canonical_id, record.strikes
            );
            ledger.record_permanent(FailureRecord::escalate(record)).await?;
        }
        Ok((remaining.len(), escalated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::url_resolver::UrlResolver;
    use crate::domain::catalog::CanonicalId;
    use crate::domain::failure::PermanentReason;
    use crate::domain::retry_policy::RetryPolicy;
    use crate::infrastructure::config::UrlConfig;
    use crate::infrastructure::failure_ledger::FailureLedger;
    use crate::infrastructure::layout::StorageLayout;
    use crate::test_utils::{MemoryArtifactStore, ScriptedSource};

    struct Harness {
        dir: tempfile::TempDir,
        source: Arc<ScriptedSource>,
        queue: FailureQueue,
        ledger: Arc<FailureLedger>,
    }

    fn harness(source: ScriptedSource, config: QueueConfig) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(source);
        let ledger = Arc::new(FailureLedger::new(StorageLayout::new(dir.path())));
        let engine = FetchEngine::new(
            source.clone(),
            Arc::new(MemoryArtifactStore::new()),
            ledger.clone(),
            UrlResolver::new(&UrlConfig::default(), "en").unwrap(),
            RetryPolicy {
                max_attempts: 1,
                ..RetryPolicy::default()
            },
            4,
        );
        Harness {
            dir,
            source,
            queue: FailureQueue::new(Arc::new(engine), config),
            ledger,
        }
    }

    async fn queue_ids(ledger: &FailureLedger, ids: &[&str]) {
        for id in ids {
            ledger
                .record_transient(FailureRecord::transient(
                    CanonicalId::from(*id),
                    StatusPartition::Authorised,
                    format!("https://host/{id}"),
                ))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn successful_retry_empties_and_deletes_the_queue() {
        let h = harness(ScriptedSource::always(200), QueueConfig::default());
        queue_ids(&h.ledger, &["Druga", "Drugb"]).await;

        let more = h.queue.drain_until_stable(StatusPartition::Authorised).await.unwrap();

        assert!(!more);
        let path = StorageLayout::new(h.dir.path()).failed_queue_path(StatusPartition::Authorised);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn not_found_during_drain_moves_id_to_permanent() {
        let h = harness(ScriptedSource::always(200).with_status("X", 404), QueueConfig::default());
        queue_ids(&h.ledger, &["X"]).await;

        assert!(!h.queue.drain_until_stable(StatusPartition::Authorised).await.unwrap());
        assert!(h.ledger.is_permanent(&CanonicalId::from("X")).await.unwrap());

        queue_ids(&h.ledger, &["X"]).await;
        h.queue.drain(StatusPartition::Authorised).await.unwrap();
        assert_eq!(h.source.requests_for("X"), 1);
    }

    #[tokio::test]
    async fn drain_stops_when_a_cycle_makes_no_progress() {
        let h = harness(ScriptedSource::always(500), QueueConfig::default());
        queue_ids(&h.ledger, &["Druga"]).await;

        let summary = h.queue.drain(StatusPartition::Authorised).await.unwrap();

        assert_eq!(summary.cycles, 1);
        assert_eq!(summary.remaining, 1);
        let pending = h.ledger.pending(StatusPartition::Authorised).await.unwrap();
        assert_eq!(pending[0].strikes, 1);
    }

    #[tokio::test]
    async fn persistent_failures_escalate_after_threshold() {
        let config = QueueConfig {
            escalate_after_cycles: 3,
            max_drain_cycles: 10,
        };
        let h = harness(ScriptedSource::always(500), config);
        queue_ids(&h.ledger, &["Druga"]).await;

        // one cycle per simulated run
        for _ in 0..2 {
            assert!(h.queue.drain_until_stable(StatusPartition::Authorised).await.unwrap());
        }
        assert!(!h.queue.drain_until_stable(StatusPartition::Authorised).await.unwrap());

        let permanent = h.ledger.permanent().await.unwrap();
        assert_eq!(permanent.len(), 1);
        assert_eq!(permanent[0].reason, Some(PermanentReason::Escalated));
        assert!(h.ledger.pending(StatusPartition::Authorised).await.unwrap().is_empty());

        h.queue.drain(StatusPartition::Authorised).await.unwrap();
        assert_eq!(h.source.requests_for("Druga"), 3);
    }

    #[tokio::test]
    async fn partial_progress_keeps_draining() {
        let h = harness(
            ScriptedSource::always(200).with_script("Drugb", &[500, 200]),
            QueueConfig::default(),
        );
        queue_ids(&h.ledger, &["Druga", "Drugb"]).await;

        let summary = h.queue.drain(StatusPartition::Authorised).await.unwrap();

        assert_eq!(summary.cycles, 2);
        assert_eq!(summary.remaining, 0);
    }
}
