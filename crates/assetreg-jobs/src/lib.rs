//! # assetreg-jobs
//!
//! Lease-based OCR job scheduler for assetreg.
//!
//! This crate provides:
//! - A pure job state machine (`plan` a provider call, `decide` the transition)
//! - Projection of job outcomes onto the owning document
//! - A lease scheduler that many instances can run against one job table
//! - Lifecycle notifications via broadcast channels
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use assetreg_db::Database;
//! use assetreg_jobs::{LeaseScheduler, SchedulerConfig};
//! use assetreg_ocr::OcrProviderClient;
//!
//! let db = Database::connect("postgres://...").await?;
//! let provider = Arc::new(OcrProviderClient::from_env()?);
//!
//! let handle = LeaseScheduler::for_database(&db, provider, SchedulerConfig::from_env())
//!     .start()?;
//!
//! let mut events = handle.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//!
//! // Graceful shutdown
//! handle.stop().await?;
//! ```

pub mod projector;
pub mod scheduler;
pub mod state_machine;

// Re-export core types
pub use assetreg_core::*;

pub use projector::{outcome_for, DocumentProjector};
pub use scheduler::{
    default_worker_id, LeaseScheduler, SchedulerConfig, SchedulerEvent, SchedulerHandle, Tick,
};
pub use state_machine::{
    accepted_status, decide, plan, Action, Mutation, ProviderResult, Transition,
};
