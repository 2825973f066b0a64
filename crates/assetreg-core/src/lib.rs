//! # assetreg-core
//!
//! Core types, traits, and abstractions for the assetreg document OCR
//! job pipeline.
//!
//! This crate provides the foundational data structures and the capability
//! traits (job store, OCR provider, document status sink) that the other
//! assetreg crates implement or consume.

pub mod defaults;
pub mod error;
pub mod fields;
pub mod logging;
pub mod models;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use fields::{extract_fields, ExtractedFields};
pub use models::*;
pub use traits::*;
pub use uuid_utils::new_v7;
