//! # assetreg-db
//!
//! PostgreSQL persistence for the assetreg OCR job pipeline.
//!
//! This crate provides:
//! - Connection pool management
//! - The OCR job store (lease-based claiming via conditional UPDATE)
//! - The document OCR status sink
//! - In-memory implementations of both for embedded use and tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use assetreg_db::{Database, OcrJobStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/assetreg").await?;
//!     let job_id = db.jobs.enqueue_for_document(document_id, "assets-dev").await?;
//!     println!("Queued OCR job: {}", job_id);
//!     Ok(())
//! }
//! ```
pub mod documents;
pub mod memory;
pub mod ocr_jobs;
pub mod pool;

// Note: Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

// Re-export core types
pub use assetreg_core::*;

pub use documents::{gcs_location, GcsInputLocator, PgDocumentRepository};
pub use memory::{InMemoryDocumentSink, InMemoryInputLocator, InMemoryOcrJobStore};
pub use ocr_jobs::PgOcrJobStore;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};

/// Repositories sharing one connection pool.
#[derive(Clone)]
pub struct Database {
    pub pool: sqlx::Pool<sqlx::Postgres>,
    pub jobs: PgOcrJobStore,
    pub documents: PgDocumentRepository,
    pub inputs: GcsInputLocator,
}

impl Database {
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        let documents = PgDocumentRepository::new(pool.clone());
        Self {
            jobs: PgOcrJobStore::new(pool.clone()),
            inputs: GcsInputLocator::from_env(documents.clone()),
            documents,
            pool,
        }
    }

    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
