//! Document OCR projection columns.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use assetreg_core::{
    defaults, DocumentOcrState, DocumentOcrStatus, DocumentStatusSink, Error, ExtractedFields,
    InputLocator, OcrOutcome, Result,
};

/// PostgreSQL implementation of DocumentStatusSink over the `documents` table.
#[derive(Clone)]
pub struct PgDocumentRepository {
    pool: Pool<Postgres>,
}

impl PgDocumentRepository {
    /// Create a new PgDocumentRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Current OCR columns of a document, or `None` if it does not exist.
    pub async fn get_ocr_state(&self, document_id: Uuid) -> Result<Option<DocumentOcrState>> {
        let row = sqlx::query(
            "SELECT ocr_status, ocr_confidence, ocr_text, ocr_fields
             FROM documents WHERE id = $1",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status: Option<String> = row.get("ocr_status");
        let fields: JsonValue = row.get("ocr_fields");
        Ok(Some(DocumentOcrState {
            ocr_status: status
                .as_deref()
                .map(str::parse::<DocumentOcrStatus>)
                .transpose()?,
            ocr_confidence: row.get("ocr_confidence"),
            ocr_text: row.get("ocr_text"),
            ocr_fields: serde_json::from_value::<ExtractedFields>(fields)?,
        }))
    }

    /// Storage path of a document's file; `None` if the document does not
    /// exist or has no file.
    pub async fn storage_path(&self, document_id: Uuid) -> Result<Option<String>> {
        let path = sqlx::query_scalar::<_, String>(
            "SELECT storage_path FROM documents WHERE id = $1",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(path.filter(|p| !p.trim().is_empty()))
    }

    async fn exists(&self, document_id: Uuid) -> Result<bool> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM documents WHERE id = $1)")
            .bind(document_id)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)
    }
}

#[async_trait]
impl DocumentStatusSink for PgDocumentRepository {
    async fn set_ocr_outcome(&self, document_id: Uuid, outcome: &OcrOutcome) -> Result<bool> {
        let fields = serde_json::to_value(&outcome.fields)?;

        // The WHERE clause only matches when something would actually change,
        // which makes repeated projections of the same outcome a no-op.
        let result = sqlx::query(
            "UPDATE documents
             SET ocr_status = $2,
                 ocr_confidence = $3,
                 ocr_text = COALESCE($4::text, ocr_text),
                 ocr_fields = CASE WHEN $5::jsonb = '{}'::jsonb THEN ocr_fields ELSE $5::jsonb END
             WHERE id = $1
               AND (ocr_status IS DISTINCT FROM $2
                    OR ocr_confidence IS DISTINCT FROM $3::double precision
                    OR ($4::text IS NOT NULL AND ocr_text IS DISTINCT FROM $4::text)
                    OR ($5::jsonb <> '{}'::jsonb AND ocr_fields IS DISTINCT FROM $5::jsonb))",
        )
        .bind(document_id)
        .bind(outcome.status.as_str())
        .bind(outcome.confidence)
        .bind(&outcome.text)
        .bind(&fields)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        let changed = result.rows_affected() > 0;
        if !changed && !self.exists(document_id).await? {
            return Err(Error::DocumentNotFound(document_id));
        }

        debug!(
            subsystem = "db",
            component = "documents",
            op = "set_ocr_outcome",
            document_id = %document_id,
            status = %outcome.status,
            changed,
            "Projected OCR outcome onto document"
        );
        Ok(changed)
    }
}

/// `gs://<bucket>/<storage_path>`.
pub fn gcs_location(bucket: &str, storage_path: &str) -> String {
    format!("gs://{}/{storage_path}", bucket.trim_end_matches('/'))
}

/// Derives a job's input from the document's storage path in a GCS bucket.
#[derive(Clone)]
pub struct GcsInputLocator {
    documents: PgDocumentRepository,
    bucket: String,
}

impl GcsInputLocator {
    pub fn new(documents: PgDocumentRepository, bucket: impl Into<String>) -> Self {
        Self {
            documents,
            bucket: bucket.into(),
        }
    }

    /// Bucket from `GCS_BUCKET_NAME` (default `assets-dev`).
    pub fn from_env(documents: PgDocumentRepository) -> Self {
        let bucket = std::env::var("GCS_BUCKET_NAME")
            .ok()
            .filter(|b| !b.trim().is_empty())
            .unwrap_or_else(|| defaults::GCS_BUCKET.to_string());
        Self::new(documents, bucket)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl InputLocator for GcsInputLocator {
    async fn locate(&self, document_id: Uuid) -> Result<Option<String>> {
        let location = self
            .documents
            .storage_path(document_id)
            .await?
            .map(|path| gcs_location(&self.bucket, &path));
        debug!(
            subsystem = "db",
            component = "documents",
            op = "locate",
            document_id = %document_id,
            found = location.is_some(),
            "Derived OCR input location from storage path"
        );
        Ok(location)
    }
}
