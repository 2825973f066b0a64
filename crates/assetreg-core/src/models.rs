//! Data models for the OCR job pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::defaults::LOCATION_MAX_LEN;
use crate::error::Error;
use crate::fields::ExtractedFields;
use crate::uuid_utils::new_v7;

// =============================================================================
// JOB STATUS
// =============================================================================

/// Status of an OCR job.
///
/// `Succeeded`, `Failed` and `LowConfidence` are terminal: once a job enters
/// one of them it is never claimed or mutated again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OcrJobStatus {
    Pending,
    Queued,
    Processing,
    Succeeded,
    Failed,
    LowConfidence,
}

impl OcrJobStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [OcrJobStatus; 6] = [
        OcrJobStatus::Pending,
        OcrJobStatus::Queued,
        OcrJobStatus::Processing,
        OcrJobStatus::Succeeded,
        OcrJobStatus::Failed,
        OcrJobStatus::LowConfidence,
    ];

    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OcrJobStatus::Pending => "Pending",
            OcrJobStatus::Queued => "Queued",
            OcrJobStatus::Processing => "Processing",
            OcrJobStatus::Succeeded => "Succeeded",
            OcrJobStatus::Failed => "Failed",
            OcrJobStatus::LowConfidence => "LowConfidence",
        }
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OcrJobStatus::Succeeded | OcrJobStatus::Failed | OcrJobStatus::LowConfidence
        )
    }

    /// Whether the job still waits for its provider operation to be started.
    pub fn is_startable(&self) -> bool {
        matches!(self, OcrJobStatus::Pending | OcrJobStatus::Queued)
    }
}

impl fmt::Display for OcrJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OcrJobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OcrJobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| Error::Serialization(format!("unknown OCR job status: {s}")))
    }
}

// =============================================================================
// DOCUMENT OCR STATUS
// =============================================================================

/// OCR status as observed on the owning document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentOcrStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
    LowConfidence,
}

impl DocumentOcrStatus {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentOcrStatus::Pending => "Pending",
            DocumentOcrStatus::Processing => "Processing",
            DocumentOcrStatus::Succeeded => "Succeeded",
            DocumentOcrStatus::Failed => "Failed",
            DocumentOcrStatus::LowConfidence => "LowConfidence",
        }
    }
}

impl From<OcrJobStatus> for DocumentOcrStatus {
    fn from(status: OcrJobStatus) -> Self {
        match status {
            OcrJobStatus::Pending | OcrJobStatus::Queued => DocumentOcrStatus::Pending,
            OcrJobStatus::Processing => DocumentOcrStatus::Processing,
            OcrJobStatus::Succeeded => DocumentOcrStatus::Succeeded,
            OcrJobStatus::Failed => DocumentOcrStatus::Failed,
            OcrJobStatus::LowConfidence => DocumentOcrStatus::LowConfidence,
        }
    }
}

impl fmt::Display for DocumentOcrStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentOcrStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(DocumentOcrStatus::Pending),
            "Processing" => Ok(DocumentOcrStatus::Processing),
            "Succeeded" => Ok(DocumentOcrStatus::Succeeded),
            "Failed" => Ok(DocumentOcrStatus::Failed),
            "LowConfidence" => Ok(DocumentOcrStatus::LowConfidence),
            other => Err(Error::Serialization(format!(
                "unknown document OCR status: {other}"
            ))),
        }
    }
}

// =============================================================================
// OCR JOB
// =============================================================================

/// A durable OCR job row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrJob {
    pub id: Uuid,
    /// Weak reference to the owning document.
    pub document_id: Uuid,
    pub status: OcrJobStatus,
    /// Incremented each time the job is advanced out of `Pending`/`Queued`.
    pub attempts: i32,
    pub last_error: Option<String>,
    /// Provider operation handle, set once the provider accepted a start request.
    pub provider_op_id: Option<String>,
    pub input_location: Option<String>,
    pub output_location: Option<String>,
    pub lease_owner: Option<String>,
    pub lease_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OcrJob {
    /// Create a fresh, unclaimed `Queued` job.
    pub fn new(document_id: Uuid, input_location: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: new_v7(),
            document_id,
            status: OcrJobStatus::Queued,
            attempts: 0,
            last_error: None,
            provider_op_id: None,
            input_location,
            output_location: None,
            lease_owner: None,
            lease_until: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Eligibility predicate shared by every job store.
    ///
    /// A job is claimable iff it is not terminal and its lease is absent or
    /// already expired at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && lease_expired(self.lease_until, now)
    }

    /// Whether `owner` holds a non-expired lease at `now`.
    pub fn is_leased_by(&self, owner: &str, now: DateTime<Utc>) -> bool {
        self.lease_owner.as_deref() == Some(owner) && !lease_expired(self.lease_until, now)
    }

    /// Apply a successful claim.
    pub fn claim(&mut self, owner: &str, lease: Duration, now: DateTime<Utc>) {
        self.lease_owner = Some(owner.to_string());
        self.lease_until = Some(now + lease);
        self.updated_at = now;
    }

    /// Release the lease so the job reads as settled.
    pub fn clear_lease(&mut self) {
        self.lease_owner = None;
        self.lease_until = None;
    }
}

/// Reject input locations that are blank or do not fit the storage column.
pub fn validate_input_location(location: Option<&str>) -> Result<(), Error> {
    match location {
        None => Ok(()),
        Some(loc) if loc.trim().is_empty() => Err(Error::InvalidInput(
            "input location must not be blank".to_string(),
        )),
        Some(loc) if loc.len() > LOCATION_MAX_LEN => Err(Error::InvalidInput(format!(
            "input location exceeds {LOCATION_MAX_LEN} bytes"
        ))),
        Some(_) => Ok(()),
    }
}

/// `lease_until` is null or strictly before `now`.
pub fn lease_expired(lease_until: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    lease_until.map_or(true, |until| until < now)
}

// =============================================================================
// PROVIDER RESPONSES
// =============================================================================

/// Answer of a provider to a start request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StartOutcome {
    /// The provider accepted the input and returned an operation handle.
    Accepted { operation_id: String },
    /// The provider refused or failed to start the operation.
    Rejected { error: String },
}

impl StartOutcome {
    pub fn accepted(operation_id: impl Into<String>) -> Self {
        StartOutcome::Accepted {
            operation_id: operation_id.into(),
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        StartOutcome::Rejected {
            error: error.into(),
        }
    }
}

/// Snapshot of a provider operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PollOutcome {
    pub done: bool,
    pub success: bool,
    pub output_location: Option<String>,
    /// Mean confidence in `[0, 1]`, when the provider reports one.
    pub mean_confidence: Option<f64>,
    /// Recognized text, when the provider returns it inline.
    pub text: Option<String>,
    /// Fields the provider recognized itself, on top of text extraction.
    #[serde(default)]
    pub fields: ExtractedFields,
    pub error: Option<String>,
}

impl PollOutcome {
    /// The operation is still in flight.
    pub fn running() -> Self {
        Self::default()
    }

    /// The operation finished successfully.
    pub fn succeeded(mean_confidence: Option<f64>) -> Self {
        Self {
            done: true,
            success: true,
            mean_confidence,
            ..Self::default()
        }
    }

    /// The operation finished with a failure.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            done: true,
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn with_output_location(mut self, location: impl Into<String>) -> Self {
        self.output_location = Some(location.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

// =============================================================================
// DOCUMENT PROJECTION
// =============================================================================

/// OCR outcome pushed onto a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrOutcome {
    pub status: DocumentOcrStatus,
    pub confidence: Option<f64>,
    pub text: Option<String>,
    /// Key/value fields recognized in the text, for merging into asset values.
    #[serde(default)]
    pub fields: ExtractedFields,
}

impl OcrOutcome {
    /// Outcome carrying only a status.
    pub fn status(status: DocumentOcrStatus) -> Self {
        Self {
            status,
            confidence: None,
            text: None,
            fields: ExtractedFields::new(),
        }
    }
}

/// OCR columns of a document, as currently stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentOcrState {
    pub ocr_status: Option<DocumentOcrStatus>,
    pub ocr_confidence: Option<f64>,
    pub ocr_text: Option<String>,
    #[serde(default)]
    pub ocr_fields: ExtractedFields,
}

impl DocumentOcrState {
    /// Apply an outcome, returning whether anything observable changed.
    ///
    /// Text and fields are only overwritten when the outcome carries them, so
    /// an interim `Processing` projection never erases earlier results.
    pub fn apply(&mut self, outcome: &OcrOutcome) -> bool {
        let mut next = self.clone();
        next.ocr_status = Some(outcome.status);
        next.ocr_confidence = outcome.confidence;
        if outcome.text.is_some() {
            next.ocr_text = outcome.text.clone();
        }
        if !outcome.fields.is_empty() {
            next.ocr_fields = outcome.fields.clone();
        }
        if next == *self {
            return false;
        }
        *self = next;
        true
    }
}

// =============================================================================
// QUEUE INSPECTION
// =============================================================================

/// Per-status job totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusCounts {
    pub pending: i64,
    pub queued: i64,
    pub processing: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub low_confidence: i64,
    /// Jobs holding a non-expired lease.
    pub leased: i64,
}

impl JobStatusCounts {
    /// Add `count` jobs of `status`.
    pub fn add(&mut self, status: OcrJobStatus, count: i64) {
        match status {
            OcrJobStatus::Pending => self.pending += count,
            OcrJobStatus::Queued => self.queued += count,
            OcrJobStatus::Processing => self.processing += count,
            OcrJobStatus::Succeeded => self.succeeded += count,
            OcrJobStatus::Failed => self.failed += count,
            OcrJobStatus::LowConfidence => self.low_confidence += count,
        }
    }

    /// Jobs that have not reached a terminal status.
    pub fn active(&self) -> i64 {
        self.pending + self.queued + self.processing
    }
}
