//! Structured logging field name constants for assetreg.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation can query by the same names across subsystems.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Fault caught at the scheduler loop boundary, store unavailable |
//! | WARN  | Provider-reported failure, low-confidence outcome, config fallback |
//! | INFO  | Lifecycle events (startup, shutdown), terminal job transitions |
//! | DEBUG | Claims, lost races, provider polls that are not done yet |
//! | TRACE | Idle polls |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "db", "ocr", "jobs", "worker"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "scheduler", "projector", "pool", "google", "azure"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "claim", "start", "poll", "project", "save"
pub const OPERATION: &str = "op";

/// Identity of the scheduler instance (the lease owner).
pub const WORKER_ID: &str = "worker_id";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// OCR job UUID being processed.
pub const JOB_ID: &str = "job_id";

/// Document UUID owning the job.
pub const DOCUMENT_ID: &str = "document_id";

/// Provider operation handle.
pub const PROVIDER_OP_ID: &str = "provider_op_id";

/// Job or document status.
pub const STATUS: &str = "status";

/// Attempt counter of a job.
pub const ATTEMPTS: &str = "attempts";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Mean OCR confidence reported by the provider.
pub const CONFIDENCE: &str = "confidence";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
