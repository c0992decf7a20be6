//! # Fetch Engine
//!
//! Downloads one artifact per catalog entry. Entries run concurrently; a
//! semaphore bounds how many requests are in flight at once. Every per-entry
//! failure ends up in the failure ledger and never aborts the batch.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::url_resolver::UrlResolver;
use crate::domain::catalog::{CanonicalId, CatalogEntry};
use crate::domain::failure::{FailureRecord, FetchOutcome, PermanentReason, ResponseClass};
use crate::domain::retry_policy::RetryPolicy;
use crate::infrastructure::artifact_store::ArtifactStore;
use crate::infrastructure::failure_ledger::FailureLedger;
use crate::infrastructure::http_client::DocumentSource;
use crate::infrastructure::layout::ArtifactSlot;

/// Per-id outcomes of one `fetch_all` call
#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchReport {
    pub outcomes: BTreeMap<CanonicalId, FetchOutcome>,
}

impl FetchReport {
    #[must_use]
    pub fn outcome(&self, id: &CanonicalId) -> Option<&FetchOutcome> {
        self.outcomes.get(id)
    }

    #[must_use]
    pub fn downloaded(&self) -> usize {
        self.count(|o| matches!(o, FetchOutcome::Downloaded { .. }))
    }

    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count(|o| !o.made_request())
    }

    #[must_use]
    pub fn not_found(&self) -> usize {
        self.count(|o| matches!(o, FetchOutcome::NotFound { .. }))
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, FetchOutcome::RetryExhausted { .. }))
    }

    fn count(&self, pred: impl Fn(&FetchOutcome) -> bool) -> usize {
        self.outcomes.values().filter(|o| pred(o)).count()
    }
}

pub struct FetchEngine {
    source: Arc<dyn DocumentSource>,
    store: Arc<dyn ArtifactStore>,
    ledger: Arc<FailureLedger>,
    resolver: UrlResolver,
    policy: RetryPolicy,
    concurrency_limit: usize,
}

impl FetchEngine {
    pub fn new(
        source: Arc<dyn DocumentSource>,
        store: Arc<dyn ArtifactStore>,
        ledger: Arc<FailureLedger>,
        resolver: UrlResolver,
        policy: RetryPolicy,
        concurrency_limit: usize,
    ) -> Self {
        Self {
            source,
            store,
            ledger,
            resolver,
            policy,
            concurrency_limit: concurrency_limit.max(1),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    #[must_use]
    pub fn ledger(&self) -> &Arc<FailureLedger> {
        &self.ledger
    }

    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn fetch_all(&self, entries: &[CatalogEntry]) -> FetchReport {
        if entries.is_empty() {
            return FetchReport::default();
        }
        // Ids recorded permanent during this batch are never fetched twice in
        // it, so one read covers the whole batch.
        let permanent = match self.ledger.permanent_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                error!("Cannot read the permanent failure list, deferring {} entries: {e}", entries.len());
                let reason = e.to_string();
                let outcomes = join_all(entries.iter().map(|entry| {
                    let url = self.resolver.resolve(&entry.canonical_id, entry.status);
                    let reason = reason.clone();
                    async move { self.give_up(entry, &url, 0, reason).await }
                }))
                .await;
                return Self::report(entries, outcomes);
            }
        };

        let gate = Semaphore::new(self.concurrency_limit);
        let outcomes = join_all(
            entries
                .iter()
                .map(|entry| self.fetch_one(entry, &permanent, &gate)),
        )
        .await;

        let report = Self::report(entries, outcomes);
        info!(
            "Fetched {} entries: {} downloaded, {} skipped, {} not found, {} queued for retry",
            entries.len(),
            report.downloaded(),
            report.skipped(),
            report.not_found(),
            report.failed()
        );
        report
    }

    fn report(entries: &[CatalogEntry], outcomes: Vec<FetchOutcome>) -> FetchReport {
        FetchReport {
            outcomes: entries
                .iter()
                .map(|e| e.canonical_id.clone())
                .zip(outcomes)
                .collect(),
        }
    }

    async fn fetch_one(
        &self,
        entry: &CatalogEntry,
        permanent: &HashSet<CanonicalId>,
        gate: &Semaphore,
    ) -> FetchOutcome {
        let id = &entry.canonical_id;
        let url = self.resolver.resolve(id, entry.status);

        match self.store.exists(entry.status, id, ArtifactSlot::Current).await {
            Ok(true) => return FetchOutcome::AlreadyPresent,
            Ok(false) => {}
            Err(e) => return self.give_up(entry, &url, 0, e.to_string()).await,
        }
        if permanent.contains(id) {
            debug!("Skipping {id}: listed as permanently unavailable");
            return FetchOutcome::KnownPermanent;
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            let response = {
                let Ok(_permit) = gate.acquire().await else {
                    return self.give_up(entry, &url, attempt - 1, "admission gate closed".to_string()).await;
                };
                self.source.fetch(&url).await
            };

            let (class, failure) = match response {
                Ok(response) => match response.class() {
                    ResponseClass::Success => {
                        return match self.store.write_current(entry.status, id, &response.body).await {
                            Ok(()) => {
                                debug!("Downloaded {id} ({} bytes)", response.body.len());
                                FetchOutcome::Downloaded {
                                    attempts: attempt,
                                    bytes: response.body.len(),
                                }
                            }
                            Err(e) => self.give_up(entry, &url, attempt, e.to_string()).await,
                        };
                    }
                    ResponseClass::NotFound => {
                        warn!("{id} not found at {url}");
                        let record =
                            FailureRecord::permanent(id.clone(), entry.status, url.clone(), PermanentReason::NotFound);
                        if let Err(e) = self.ledger.record_permanent(record).await {
                            error!("Failed to record {id} as not found: {e}");
                        }
                        return FetchOutcome::NotFound { attempts: attempt };
                    }
                    class => (class, format!("HTTP {}", response.status)),
                },
                Err(e) => (ResponseClass::OtherFailure, e.to_string()),
            };

            if !self.policy.should_retry(class, attempt) {
                return self.give_up(entry, &url, attempt, failure).await;
            }
            let delay = self.policy.backoff_delay();
            debug!("{id}: {failure} on attempt {attempt}, retrying in {delay:?}");
            sleep(delay).await;
        }
    }

    async fn give_up(&self, entry: &CatalogEntry, url: &str, attempts: u32, last_error: String) -> FetchOutcome {
        let id = &entry.canonical_id;
        warn!("Giving up on {id} for now after {attempts} attempt(s): {last_error}");
        let record = FailureRecord::transient(id.clone(), entry.status, url);
        if let Err(e) = self.ledger.record_transient(record).await {
            error!("Failed to queue {id} for retry: {e}");
        }
        FetchOutcome::RetryExhausted { attempts, last_error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::catalog::StatusPartition;
    use crate::infrastructure::config::UrlConfig;
    use crate::infrastructure::layout::StorageLayout;
    use crate::test_utils::{MemoryArtifactStore, ScriptedSource};

    struct Harness {
        _dir: tempfile::TempDir,
        source: Arc<ScriptedSource>,
        store: Arc<MemoryArtifactStore>,
        ledger: Arc<FailureLedger>,
        engine: FetchEngine,
    }

    fn harness(source: ScriptedSource, concurrency_limit: usize) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(source);
        let store = Arc::new(MemoryArtifactStore::new());
        let ledger = Arc::new(FailureLedger::new(StorageLayout::new(dir.path())));
        let policy = RetryPolicy {
            backoff_min_ms: 1,
            backoff_max_ms: 2,
            ..RetryPolicy::default()
        };
        let engine = FetchEngine::new(
            source.clone(),
            store.clone(),
            ledger.clone(),
            UrlResolver::new(&UrlConfig::default(), "en").unwrap(),
            policy,
            concurrency_limit,
        );
        Harness {
            _dir: dir,
            source,
            store,
            ledger,
            engine,
        }
    }

    fn entry(name: &str) -> CatalogEntry {
        CatalogEntry::new(name, CanonicalId::from(name), 1, StatusPartition::Authorised).unwrap()
    }

    #[tokio::test]
    async fn second_fetch_of_present_artifact_makes_no_request() {
        let h = harness(ScriptedSource::always(200), 2);
        let entries = [entry("Druga")];

        h.engine.fetch_all(&entries).await;
        let report = h.engine.fetch_all(&entries).await;

        assert_eq!(h.source.total_requests(), 1);
        assert_eq!(report.outcome(&CanonicalId::from("Druga")), Some(&FetchOutcome::AlreadyPresent));
    }

    #[tokio::test]
    async fn not_found_is_recorded_once_and_never_refetched() {
        let h = harness(ScriptedSource::always(404), 2);
        let entries = [entry("X")];

        let first = h.engine.fetch_all(&entries).await;
        let second = h.engine.fetch_all(&entries).await;

        assert_eq!(first.not_found(), 1);
        assert_eq!(second.outcome(&CanonicalId::from("X")), Some(&FetchOutcome::KnownPermanent));
        assert_eq!(h.source.total_requests(), 1);
        assert_eq!(h.ledger.permanent().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ids_already_permanent_are_skipped_for_the_whole_batch() {
        let h = harness(ScriptedSource::always(200), 4);
        let entries: Vec<CatalogEntry> = (0..20).map(|i| entry(&format!("Drug{i}"))).collect();
        for gone in entries.iter().step_by(2) {
            let record = FailureRecord::permanent(
                gone.canonical_id.clone(),
                gone.status,
                "https://example.invalid",
                PermanentReason::NotFound,
            );
            h.ledger.record_permanent(record).await.unwrap();
        }

        let report = h.engine.fetch_all(&entries).await;

        assert_eq!(h.source.total_requests(), 10);
        assert_eq!(report.downloaded(), 10);
        assert_eq!(report.outcome(&CanonicalId::from("Drug4")), Some(&FetchOutcome::KnownPermanent));
    }

    #[tokio::test]
    async fn unreadable_permanent_list_defers_the_batch_without_requests() {
        let h = harness(ScriptedSource::always(200), 2);
        let path = StorageLayout::new(h._dir.path()).not_found_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "Name,Status,Url\nX,Refused,https://example.invalid\n").unwrap();

        let report = h.engine.fetch_all(&[entry("Druga"), entry("Drugb")]).await;

        assert_eq!(h.source.total_requests(), 0);
        assert_eq!(report.failed(), 2);
    }

    #[tokio::test]
    async fn rate_limits_are_retried_up_to_the_ceiling() {
        let h = harness(ScriptedSource::always(429), 1);

        let report = h.engine.fetch_all(&[entry("Druga")]).await;

        assert_eq!(h.source.total_requests(), 5);
        assert!(matches!(
            report.outcome(&CanonicalId::from("Druga")),
            Some(FetchOutcome::RetryExhausted { attempts: 5, .. })
        ));
        assert_eq!(h.ledger.pending(StatusPartition::Authorised).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rate_limit_then_success_downloads() {
        let h = harness(ScriptedSource::always(200).with_script("Druga", &[429, 429, 200]), 1);

        let report = h.engine.fetch_all(&[entry("Druga")]).await;

        assert_eq!(
            report.outcome(&CanonicalId::from("Druga")),
            Some(&FetchOutcome::Downloaded { attempts: 3, bytes: 8 })
        );
        assert!(h.store.holds(StatusPartition::Authorised, "Druga", ArtifactSlot::Current));
        assert!(h.ledger.pending(StatusPartition::Authorised).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn other_failures_are_not_retried() {
        let h = harness(ScriptedSource::always(503), 1);

        let report = h.engine.fetch_all(&[entry("Druga")]).await;

        assert_eq!(h.source.total_requests(), 1);
        assert_eq!(report.failed(), 1);
    }

    #[tokio::test]
    async fn transport_errors_queue_a_transient_failure() {
        let h = harness(ScriptedSource::always(200).failing("Druga"), 1);

        h.engine.fetch_all(&[entry("Druga"), entry("Drugb")]).await;

        let pending = h.ledger.pending(StatusPartition::Authorised).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].canonical_id.as_str(), "Druga");
        assert!(h.store.holds(StatusPartition::Authorised, "Drugb", ArtifactSlot::Current));
    }

    #[tokio::test]
    async fn in_flight_requests_never_exceed_the_limit() {
        let h = harness(ScriptedSource::always(200).with_latency_ms(5), 3);
        let entries: Vec<_> = (0..12).map(|i| entry(&format!("Drug{i}"))).collect();

        let report = h.engine.fetch_all(&entries).await;

        assert_eq!(report.downloaded(), 12);
        assert!(h.source.max_in_flight() <= 3);
    }
}
