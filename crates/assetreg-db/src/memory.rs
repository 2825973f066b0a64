//! In-memory job store and document sink.
//!
//! Used for embedded single-process deployments and throughout the test
//! suites. Every operation takes the same mutex, so `try_claim` is atomic
//! exactly like the conditional UPDATE of the PostgreSQL store.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use assetreg_core::{
    validate_input_location, DocumentOcrState, DocumentStatusSink, Error, InputLocator,
    JobStatusCounts, OcrJob, OcrJobStore, OcrOutcome, Result,
};

fn unavailable() -> Error {
    Error::Database(sqlx::Error::PoolTimedOut)
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| Error::Internal("in-memory store lock poisoned".to_string()))
}

// =============================================================================
// JOB STORE
// =============================================================================

/// Mutex-guarded OcrJobStore.
#[derive(Default)]
pub struct InMemoryOcrJobStore {
    jobs: Mutex<BTreeMap<Uuid, OcrJob>>,
    unavailable: AtomicBool,
}

impl InMemoryOcrJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a job verbatim.
    pub fn insert(&self, job: OcrJob) -> Result<()> {
        lock(&self.jobs)?.insert(job.id, job);
        Ok(())
    }

    /// Snapshot of every job.
    pub fn snapshot(&self) -> Result<Vec<OcrJob>> {
        Ok(lock(&self.jobs)?.values().cloned().collect())
    }

    /// Simulate an outage: while set, every operation fails with a
    /// transient database error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(())
    }
}

#[async_trait]
impl OcrJobStore for InMemoryOcrJobStore {
    async fn find_oldest_eligible(&self, now: DateTime<Utc>) -> Result<Option<Uuid>> {
        self.check_available()?;
        let jobs = lock(&self.jobs)?;
        Ok(jobs
            .values()
            .filter(|job| job.is_eligible(now))
            .min_by_key(|job| (job.updated_at, job.id))
            .map(|job| job.id))
    }

    async fn try_claim(
        &self,
        job_id: Uuid,
        worker_id: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.check_available()?;
        let mut jobs = lock(&self.jobs)?;
        match jobs.get_mut(&job_id) {
            Some(job) if job.is_eligible(now) => {
                job.claim(worker_id, lease, now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn load(&self, job_id: Uuid) -> Result<OcrJob> {
        self.get(job_id).await?.ok_or(Error::JobNotFound(job_id))
    }

    async fn holds_lease(
        &self,
        job_id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.check_available()?;
        Ok(lock(&self.jobs)?
            .get(&job_id)
            .is_some_and(|job| job.is_leased_by(worker_id, now)))
    }

    async fn save(&self, job: &OcrJob, worker_id: &str, now: DateTime<Utc>) -> Result<bool> {
        self.check_available()?;
        let mut jobs = lock(&self.jobs)?;
        let stored = jobs.get_mut(&job.id).ok_or(Error::JobNotFound(job.id))?;
        if stored.status.is_terminal() {
            return Err(Error::InvalidTransition(format!(
                "job {} is already {}",
                job.id, stored.status
            )));
        }
        if !stored.is_leased_by(worker_id, now) {
            return Ok(false);
        }

        let mut next = job.clone();
        next.created_at = stored.created_at;
        next.updated_at = now.max(stored.updated_at);
        *stored = next;
        Ok(true)
    }

    async fn enqueue(&self, document_id: Uuid, input_location: Option<String>) -> Result<Uuid> {
        self.check_available()?;
        validate_input_location(input_location.as_deref())?;
        let job = OcrJob::new(document_id, input_location, Utc::now());
        let id = job.id;
        lock(&self.jobs)?.insert(id, job);
        Ok(id)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<OcrJob>> {
        self.check_available()?;
        Ok(lock(&self.jobs)?.get(&job_id).cloned())
    }

    async fn list_for_document(&self, document_id: Uuid) -> Result<Vec<OcrJob>> {
        self.check_available()?;
        let mut jobs: Vec<OcrJob> = lock(&self.jobs)?
            .values()
            .filter(|job| job.document_id == document_id)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(jobs)
    }

    async fn status_counts(&self, now: DateTime<Utc>) -> Result<JobStatusCounts> {
        self.check_available()?;
        let jobs = lock(&self.jobs)?;
        let mut counts = JobStatusCounts::default();
        for job in jobs.values() {
            counts.add(job.status, 1);
            if !job.status.is_terminal() && job.lease_until.is_some_and(|until| until >= now) {
                counts.leased += 1;
            }
        }
        Ok(counts)
    }
}

// =============================================================================
// DOCUMENT SINK
// =============================================================================

/// Mutex-guarded DocumentStatusSink.
///
/// Documents are created on their first projection.
#[derive(Default)]
pub struct InMemoryDocumentSink {
    documents: Mutex<HashMap<Uuid, DocumentOcrState>>,
    writes: AtomicUsize,
}

impl InMemoryDocumentSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current OCR state of a document.
    pub fn state(&self, document_id: Uuid) -> Option<DocumentOcrState> {
        lock(&self.documents)
            .ok()
            .and_then(|docs| docs.get(&document_id).cloned())
    }

    /// Number of projections that changed something.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStatusSink for InMemoryDocumentSink {
    async fn set_ocr_outcome(&self, document_id: Uuid, outcome: &OcrOutcome) -> Result<bool> {
        let mut docs = lock(&self.documents)?;
        let changed = docs.entry(document_id).or_default().apply(outcome);
        if changed {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(changed)
    }
}

// =============================================================================
// INPUT LOCATOR
// =============================================================================

/// Map of document id to stored file location.
#[derive(Default)]
pub struct InMemoryInputLocator {
    locations: Mutex<HashMap<Uuid, String>>,
}

impl InMemoryInputLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, document_id: Uuid, location: impl Into<String>) -> Result<()> {
        lock(&self.locations)?.insert(document_id, location.into());
        Ok(())
    }
}

#[async_trait]
impl InputLocator for InMemoryInputLocator {
    async fn locate(&self, document_id: Uuid) -> Result<Option<String>> {
        Ok(lock(&self.locations)?.get(&document_id).cloned())
    }
}
