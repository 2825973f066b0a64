//! OCR job repository implementation.
//!
//! Lease checks read the database clock (`now()`), never the caller's, so
//! every worker sharing the table measures leases against the same time.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, warn};
use uuid::Uuid;

use assetreg_core::{
    new_v7, validate_input_location, Error, JobStatusCounts, OcrJob, OcrJobStatus, OcrJobStore,
    Result,
};

/// Statuses a job can still leave. Kept in sync with `OcrJobStatus::is_terminal`.
const ACTIVE_STATUSES: &str = "('Pending', 'Queued', 'Processing')";

const JOB_COLUMNS: &str = "id, document_id, status, attempts, last_error, provider_op_id, \
     input_location, output_location, lease_owner, lease_until, created_at, updated_at";

/// PostgreSQL implementation of OcrJobStore.
#[derive(Clone)]
pub struct PgOcrJobStore {
    pool: Pool<Postgres>,
}

impl PgOcrJobStore {
    /// Create a new PgOcrJobStore with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Parse a job row into an OcrJob struct.
    fn parse_job_row(row: sqlx::postgres::PgRow) -> Result<OcrJob> {
        let status: String = row.get("status");
        Ok(OcrJob {
            id: row.get("id"),
            document_id: row.get("document_id"),
            status: status.parse()?,
            attempts: row.get("attempts"),
            last_error: row.get("last_error"),
            provider_op_id: row.get("provider_op_id"),
            input_location: row.get("input_location"),
            output_location: row.get("output_location"),
            lease_owner: row.get("lease_owner"),
            lease_until: row.get("lease_until"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    /// Queue a job for a stored document, deriving its input location as
    /// `gs://<bucket>/<storage_path>`.
    ///
    /// Errors with `DocumentNotFound` if the document does not exist.
    pub async fn enqueue_for_document(&self, document_id: Uuid, bucket: &str) -> Result<Uuid> {
        let job_id = new_v7();

        let inserted = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO ocr_jobs (id, document_id, status, attempts, input_location, created_at, updated_at)
             SELECT $1, d.id, 'Queued', 0, 'gs://' || $3 || '/' || d.storage_path, now(), now()
             FROM documents d
             WHERE d.id = $2
             RETURNING id",
        )
        .bind(job_id)
        .bind(document_id)
        .bind(bucket.trim_end_matches('/'))
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        let id = inserted.ok_or(Error::DocumentNotFound(document_id))?;
        debug!(
            subsystem = "db",
            component = "ocr_jobs",
            op = "enqueue",
            job_id = %id,
            document_id = %document_id,
            "Queued OCR job for document"
        );
        Ok(id)
    }
}

#[async_trait]
impl OcrJobStore for PgOcrJobStore {
    async fn find_oldest_eligible(&self, _now: DateTime<Utc>) -> Result<Option<Uuid>> {
        let sql = format!(
            "SELECT id FROM ocr_jobs
             WHERE status IN {ACTIVE_STATUSES}
               AND (lease_until IS NULL OR lease_until < now())
             ORDER BY updated_at ASC, id ASC
             LIMIT 1"
        );
        sqlx::query_scalar::<_, Uuid>(&sql)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)
    }

    async fn try_claim(
        &self,
        job_id: Uuid,
        worker_id: &str,
        lease: Duration,
        _now: DateTime<Utc>,
    ) -> Result<bool> {
        // Conditional write: the eligibility predicate is re-evaluated by the
        // database at update time, so at most one concurrent caller matches.
        let sql = format!(
            "UPDATE ocr_jobs
             SET lease_owner = $2,
                 lease_until = now() + $3::double precision * INTERVAL '1 millisecond',
                 updated_at = now()
             WHERE id = $1
               AND status IN {ACTIVE_STATUSES}
               AND (lease_until IS NULL OR lease_until < now())"
        );
        let result = sqlx::query(&sql)
            .bind(job_id)
            .bind(worker_id)
            .bind(lease.num_milliseconds() as f64)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn load(&self, job_id: Uuid) -> Result<OcrJob> {
        self.get(job_id).await?.ok_or(Error::JobNotFound(job_id))
    }

    async fn holds_lease(
        &self,
        job_id: Uuid,
        worker_id: &str,
        _now: DateTime<Utc>,
    ) -> Result<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (
                 SELECT 1 FROM ocr_jobs
                 WHERE id = $1 AND lease_owner = $2 AND lease_until >= now()
             )",
        )
        .bind(job_id)
        .bind(worker_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)
    }

    async fn save(&self, job: &OcrJob, worker_id: &str, _now: DateTime<Utc>) -> Result<bool> {
        let sql = format!(
            "UPDATE ocr_jobs
             SET status = $2, attempts = $3, last_error = $4, provider_op_id = $5,
                 input_location = $6, output_location = $7, lease_owner = $8,
                 lease_until = $9, updated_at = now()
             WHERE id = $1
               AND status IN {ACTIVE_STATUSES}
               AND lease_owner = $10
               AND lease_until >= now()"
        );
        let result = sqlx::query(&sql)
            .bind(job.id)
            .bind(job.status.as_str())
            .bind(job.attempts)
            .bind(&job.last_error)
            .bind(&job.provider_op_id)
            .bind(&job.input_location)
            .bind(&job.output_location)
            .bind(&job.lease_owner)
            .bind(job.lease_until)
            .bind(worker_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        match self.get(job.id).await? {
            None => Err(Error::JobNotFound(job.id)),
            Some(stored) if !stored.status.is_terminal() => {
                warn!(
                    subsystem = "db",
                    component = "ocr_jobs",
                    op = "save",
                    job_id = %job.id,
                    worker_id = %worker_id,
                    lease_owner = stored.lease_owner.as_deref().unwrap_or_default(),
                    "Lease lost before save, nothing written"
                );
                Ok(false)
            }
            Some(stored) => {
                warn!(
                    subsystem = "db",
                    component = "ocr_jobs",
                    op = "save",
                    job_id = %job.id,
                    status = %stored.status,
                    "Refused to overwrite terminal OCR job"
                );
                Err(Error::InvalidTransition(format!(
                    "job {} is already {}",
                    job.id, stored.status
                )))
            }
        }
    }

    async fn enqueue(&self, document_id: Uuid, input_location: Option<String>) -> Result<Uuid> {
        validate_input_location(input_location.as_deref())?;

        let job = OcrJob::new(document_id, input_location, Utc::now());
        let result = sqlx::query(
            "INSERT INTO ocr_jobs (id, document_id, status, attempts, input_location, created_at, updated_at)
             VALUES ($1, $2, $3, 0, $4, now(), now())",
        )
        .bind(job.id)
        .bind(job.document_id)
        .bind(job.status.as_str())
        .bind(&job.input_location)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(job.id),
            Err(sqlx::Error::Database(db_err)) if db_err.is_foreign_key_violation() => {
                Err(Error::DocumentNotFound(document_id))
            }
            Err(e) => Err(Error::Database(e)),
        }
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<OcrJob>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM ocr_jobs WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn list_for_document(&self, document_id: Uuid) -> Result<Vec<OcrJob>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM ocr_jobs
             WHERE document_id = $1
             ORDER BY created_at DESC, id DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(document_id)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_job_row).collect()
    }

    async fn status_counts(&self, _now: DateTime<Utc>) -> Result<JobStatusCounts> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM ocr_jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let mut counts = JobStatusCounts::default();
        for row in rows {
            let status: String = row.get("status");
            let n: i64 = row.get("n");
            counts.add(status.parse::<OcrJobStatus>()?, n);
        }

        let sql = format!(
            "SELECT COUNT(*) FROM ocr_jobs
             WHERE status IN {ACTIVE_STATUSES} AND lease_until >= now()"
        );
        counts.leased = sqlx::query_scalar::<_, i64>(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(counts)
    }
}
