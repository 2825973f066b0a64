//! Capability traits of the OCR job pipeline.
//!
//! The scheduler only talks to persistence, the OCR backend and the document
//! table through these traits, so each side can be swapped (PostgreSQL or
//! in-memory store, Google/Azure/fake provider) and tested in isolation.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// JOB STORE
// =============================================================================

/// Durable table of OCR jobs; the only state shared between workers.
///
/// Every lease comparison is made against `now`. Stores shared between hosts
/// may read the instant from their own clock instead, so that workers with
/// skewed clocks agree on when a lease has lapsed.
#[async_trait]
pub trait OcrJobStore: Send + Sync {
    /// Oldest eligible job by `updated_at`, then `id`, at `now`.
    ///
    /// Snapshot read: it grants no ownership.
    async fn find_oldest_eligible(&self, now: DateTime<Utc>) -> Result<Option<Uuid>>;

    /// Atomically take the lease on `job_id`.
    ///
    /// Succeeds only if, at the moment of the write, the job is still
    /// non-terminal and its lease is null or before `now`. Sets
    /// `lease_owner = worker_id`, `lease_until = now + lease` and
    /// `updated_at = now`. `Ok(false)` means another worker won the race.
    async fn try_claim(
        &self,
        job_id: Uuid,
        worker_id: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Full row read. Errors with `JobNotFound` for an unknown id.
    async fn load(&self, job_id: Uuid) -> Result<OcrJob>;

    /// Whether `worker_id` still holds a live lease on `job_id` at `now`.
    async fn holds_lease(
        &self,
        job_id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Persist every mutable field of `job` atomically with a fresh
    /// `updated_at`, provided `worker_id` still holds the lease at `now`.
    ///
    /// `Ok(false)` means the lease lapsed or passed to another worker and
    /// nothing was written. Rows that are already terminal are immutable;
    /// saving over one is an `InvalidTransition` error.
    async fn save(&self, job: &OcrJob, worker_id: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Create a `Queued`, unclaimed job for a document.
    async fn enqueue(&self, document_id: Uuid, input_location: Option<String>) -> Result<Uuid>;

    /// Job by id, if it exists.
    async fn get(&self, job_id: Uuid) -> Result<Option<OcrJob>>;

    /// Every job of a document, newest first.
    async fn list_for_document(&self, document_id: Uuid) -> Result<Vec<OcrJob>>;

    /// Per-status totals and the number of live leases at `now`.
    async fn status_counts(&self, now: DateTime<Utc>) -> Result<JobStatusCounts>;
}

// =============================================================================
// OCR PROVIDER
// =============================================================================

/// Two-phase OCR backend: start a long-running operation, then poll it.
///
/// Provider-reported failures are values (`StartOutcome::Rejected`,
/// `PollOutcome { success: false, .. }`); `Err` is reserved for transport
/// faults. Dropping the returned future cancels the call.
#[async_trait]
pub trait OcrProvider: Send + Sync {
    /// Short provider name for logs ("fake", "google", "azure", "mock").
    fn name(&self) -> &'static str;

    /// Start OCR of the document at `input_location`.
    async fn start(&self, input_location: &str) -> Result<StartOutcome>;

    /// Query the state of a previously started operation.
    async fn poll(&self, operation_id: &str) -> Result<PollOutcome>;
}

// =============================================================================
// DOCUMENT STATUS SINK
// =============================================================================

/// Write side of the document's OCR columns.
#[async_trait]
pub trait DocumentStatusSink: Send + Sync {
    /// Set status, confidence, text and fields of a document.
    ///
    /// Must be safe to call repeatedly with the same outcome; returns whether
    /// anything observable changed.
    async fn set_ocr_outcome(&self, document_id: Uuid, outcome: &OcrOutcome) -> Result<bool>;
}

// =============================================================================
// INPUT LOCATOR
// =============================================================================

/// Fallback source for the input of jobs enqueued without one.
#[async_trait]
pub trait InputLocator: Send + Sync {
    /// Location of the stored file of a document, if it has one.
    async fn locate(&self, document_id: Uuid) -> Result<Option<String>>;
}
