//! Centralized default constants for the assetreg OCR pipeline.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers.

// =============================================================================
// LEASE SCHEDULER
// =============================================================================

/// Idle poll cadence of a scheduler instance in milliseconds.
pub const OCR_POLL_INTERVAL_MS: u64 = 5_000;

/// Validity window of a claim in seconds.
///
/// Must comfortably exceed one provider round trip and the poll interval,
/// otherwise an in-flight job is reclaimed by a sibling worker.
pub const OCR_LEASE_DURATION_SECS: u64 = 120;

/// Sleep after a fault caught at the loop boundary, in milliseconds.
pub const OCR_ERROR_BACKOFF_MS: u64 = 2_000;

/// Number of scheduler instances started by the host binary.
pub const OCR_WORKER_COUNT: usize = 1;

/// Capacity of the scheduler event broadcast channel.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// OCR ACCEPTANCE
// =============================================================================

/// Minimum mean confidence for a result to be accepted as `Succeeded`.
pub const OCR_CONFIDENCE_THRESHOLD: f64 = 0.85;

// =============================================================================
// PROVIDERS
// =============================================================================

/// Provider used when `OCR_PROVIDER` is unset.
pub const OCR_PROVIDER: &str = "fake";

/// Default Google Cloud Vision API base URL.
pub const GOOGLE_VISION_URL: &str = "https://vision.googleapis.com";

/// Default OCR language hints.
pub const OCR_LANGUAGE_HINTS: &[&str] = &["ar", "en"];

/// Timeout for a single provider HTTP request in seconds.
pub const OCR_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Bucket used to derive input locations from document storage paths.
pub const GCS_BUCKET: &str = "assets-dev";

// =============================================================================
// STORAGE LIMITS
// =============================================================================

/// Maximum stored length of an input/output location.
pub const LOCATION_MAX_LEN: usize = 512;

/// Maximum stored length of a lease owner identity.
pub const LEASE_OWNER_MAX_LEN: usize = 128;
