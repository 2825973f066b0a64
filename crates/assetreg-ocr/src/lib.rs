//! # assetreg-ocr
//!
//! OCR provider clients for the assetreg OCR job pipeline.
//!
//! Every provider follows the same two-phase protocol: `start` hands a
//! document location to the backend and returns an operation handle, `poll`
//! reports whether that operation finished and how it went.
//!
//! - `fake`: in-process, for development without cloud credentials
//! - `google`: Google Cloud Vision asynchronous batch annotation
//! - `azure`: Azure Computer Vision Read API
//! - `mock`: scripted responses for tests (feature `mock`)
//!
//! # Example
//!
//! ```rust,no_run
//! use assetreg_ocr::OcrProviderClient;
//! use assetreg_core::OcrProvider;
//!
//! #[tokio::main]
//! async fn main() -> assetreg_core::Result<()> {
//!     let provider = OcrProviderClient::from_env()?;
//!     let started = provider.start("gs://assets-dev/uploads/deed.pdf").await?;
//!     println!("{started:?}");
//!     Ok(())
//! }
//! ```

pub mod azure;
pub mod fake;
pub mod google;
pub mod provider;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use azure::{AzureReadConfig, AzureReadProvider};
pub use fake::FakeOcrProvider;
pub use google::{GoogleVisionConfig, GoogleVisionProvider};
pub use provider::{OcrProviderClient, ProviderKind};

#[cfg(any(test, feature = "mock"))]
pub use mock::MockOcrProvider;
