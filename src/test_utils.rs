//! Test doubles for the collaborator traits
//!
//! `ScriptedSource` answers requests from per-id status scripts and counts
//! them; `MemoryArtifactStore` keeps artifacts in memory, records its state
//! after every mutation and can inject storage failures.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::application::url_resolver::default_slug;
use crate::domain::catalog::{CanonicalId, StatusPartition};
use crate::infrastructure::artifact_store::ArtifactStore;
use crate::infrastructure::http_client::{DocumentSource, FetchResponse};
use crate::infrastructure::layout::ArtifactSlot;
use crate::infrastructure::sync_error::{SyncError, SyncResult, TransportError};

pub const PDF_BODY: &[u8] = b"%PDF-1.7";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Key used to match a request URL back to the id it was built for
fn url_key(url: &str) -> String {
    let file = url.rsplit('/').next().unwrap_or(url);
    let stem = file.split('_').next().unwrap_or(file);
    stem.trim_end_matches("-epar-product-information").to_lowercase()
}

fn id_key(id: &str) -> String {
    url_key(&default_slug(&CanonicalId::from(id)))
}

pub struct ScriptedSource {
    default_status: u16,
    statuses: Mutex<HashMap<String, u16>>,
    scripts: Mutex<HashMap<String, VecDeque<u16>>>,
    failing: Mutex<HashSet<String>>,
    latency: Duration,
    requests: Mutex<HashMap<String, u32>>,
    total: AtomicU32,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedSource {
    /// Every request answers `status` unless scripted otherwise
    #[must_use]
    pub fn always(status: u16) -> Self {
        Self {
            default_status: status,
            statuses: Mutex::new(HashMap::new()),
            scripts: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            latency: Duration::ZERO,
            requests: Mutex::new(HashMap::new()),
            total: AtomicU32::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Statuses answered in order for `id`, before falling back
    #[must_use]
    pub fn with_script(self, id: &str, statuses: &[u16]) -> Self {
        lock(&self.scripts).insert(id_key(id), statuses.iter().copied().collect());
        self
    }

    #[must_use]
    pub fn with_status(self, id: &str, status: u16) -> Self {
        self.set_status(id, status);
        self
    }

    /// Requests for `id` fail at the transport level
    #[must_use]
    pub fn failing(self, id: &str) -> Self {
        lock(&self.failing).insert(id_key(id));
        self
    }

    #[must_use]
    pub fn with_latency_ms(mut self, millis: u64) -> Self {
        self.latency = Duration::from_millis(millis);
        self
    }

    pub fn set_status(&self, id: &str, status: u16) {
        let key = id_key(id);
        lock(&self.failing).remove(&key);
        lock(&self.statuses).insert(key, status);
    }

    #[must_use]
    pub fn total_requests(&self) -> u32 {
        self.total.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn requests_for(&self, id: &str) -> u32 {
        lock(&self.requests).get(&id_key(id)).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_status(&self, key: &str) -> u16 {
        if let Some(status) = lock(&self.scripts).get_mut(key).and_then(VecDeque::pop_front) {
            return status;
        }
        lock(&self.statuses)
            .get(key)
            .copied()
            .unwrap_or(self.default_status)
    }
}

#[async_trait]
impl DocumentSource for ScriptedSource {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, TransportError> {
        let key = url_key(url);
        self.total.fetch_add(1, Ordering::SeqCst);
        *lock(&self.requests).entry(key.clone()).or_insert(0) += 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if lock(&self.failing).contains(&key) {
            return Err(TransportError::Connection {
                url: url.to_string(),
                message: "connection reset".to_string(),
            });
        }
        let status = self.next_status(&key);
        let body = if (200..300).contains(&status) {
            PDF_BODY.to_vec()
        } else {
            Vec::new()
        };
        Ok(FetchResponse { status, body })
    }
}

pub type ArtifactKey = (StatusPartition, String, ArtifactSlot);

#[derive(Default)]
pub struct MemoryArtifactStore {
    files: Mutex<HashMap<ArtifactKey, Vec<u8>>>,
    history: Mutex<Vec<HashSet<ArtifactKey>>>,
    failing_writes: Mutex<HashSet<String>>,
    failing_retires: Mutex<HashSet<String>>,
}

impl MemoryArtifactStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, partition: StatusPartition, id: &str, slot: ArtifactSlot, bytes: &[u8]) {
        lock(&self.files).insert((partition, id.to_string(), slot), bytes.to_vec());
    }

    #[must_use]
    pub fn holds(&self, partition: StatusPartition, id: &str, slot: ArtifactSlot) -> bool {
        lock(&self.files).contains_key(&(partition, id.to_string(), slot))
    }

    #[must_use]
    pub fn read(&self, partition: StatusPartition, id: &str, slot: ArtifactSlot) -> Option<Vec<u8>> {
        lock(&self.files).get(&(partition, id.to_string(), slot)).cloned()
    }

    pub fn fail_writes_for(&self, id: &str) {
        lock(&self.failing_writes).insert(id.to_string());
    }

    pub fn fail_retires_for(&self, id: &str) {
        lock(&self.failing_retires).insert(id.to_string());
    }

    pub fn heal(&self) {
        lock(&self.failing_writes).clear();
        lock(&self.failing_retires).clear();
    }

    /// Artifact keys present after each mutation, oldest first
    #[must_use]
    pub fn history(&self) -> Vec<HashSet<ArtifactKey>> {
        lock(&self.history).clone()
    }

    fn record(&self, files: &HashMap<ArtifactKey, Vec<u8>>) {
        lock(&self.history).push(files.keys().cloned().collect());
    }

    fn injected(id: &CanonicalId, op: &str) -> SyncError {
        SyncError::io(format!("memory://{id}"), io::Error::other(format!("injected {op} failure")))
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn exists(&self, partition: StatusPartition, id: &CanonicalId, slot: ArtifactSlot) -> SyncResult<bool> {
        Ok(self.holds(partition, id.as_str(), slot))
    }

    async fn write_current(&self, partition: StatusPartition, id: &CanonicalId, bytes: &[u8]) -> SyncResult<()> {
        if lock(&self.failing_writes).contains(id.as_str()) {
            return Err(Self::injected(id, "write"));
        }
        let mut files = lock(&self.files);
        files.insert((partition, id.to_string(), ArtifactSlot::Current), bytes.to_vec());
        self.record(&files);
        Ok(())
    }

    async fn retire_current(&self, partition: StatusPartition, id: &CanonicalId) -> SyncResult<bool> {
        if lock(&self.failing_retires).contains(id.as_str()) {
            return Err(Self::injected(id, "rename"));
        }
        let mut files = lock(&self.files);
        let Some(bytes) = files.remove(&(partition, id.to_string(), ArtifactSlot::Current)) else {
            return Ok(false);
        };
        files.insert((partition, id.to_string(), ArtifactSlot::Old), bytes);
        self.record(&files);
        Ok(true)
    }

    async fn remove(&self, partition: StatusPartition, id: &CanonicalId, slot: ArtifactSlot) -> SyncResult<bool> {
        let mut files = lock(&self.files);
        let removed = files.remove(&(partition, id.to_string(), slot)).is_some();
        if removed {
            self.record(&files);
        }
        Ok(removed)
    }

    async fn list(&self, partition: StatusPartition, slot: ArtifactSlot) -> SyncResult<Vec<CanonicalId>> {
        let mut ids: Vec<_> = lock(&self.files)
            .keys()
            .filter(|(p, _, s)| *p == partition && *s == slot)
            .map(|(_, id, _)| CanonicalId::from(id.as_str()))
            .collect();
        ids.sort();
        Ok(ids)
    }
}
