//! Google Cloud Vision provider (asynchronous batch annotation).
//!
//! `start` submits a `DOCUMENT_TEXT_DETECTION` request through
//! `files:asyncBatchAnnotate` (PDF, TIFF, GIF) or `images:asyncBatchAnnotate`
//! (everything else) and returns the long-running operation name. `poll`
//! reads that operation. Results are written by Google to the configured
//! Cloud Storage prefix, so a finished operation reports an output location
//! but no inline text or confidence.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use assetreg_core::defaults;
use assetreg_core::{Error, OcrProvider, PollOutcome, Result, StartOutcome};

use crate::provider::rejects_request;

/// Google Vision connection settings.
#[derive(Debug, Clone)]
pub struct GoogleVisionConfig {
    pub api_key: String,
    pub base_url: String,
    /// `gs://` prefix under which each operation gets its own output folder.
    pub output_prefix: String,
    pub language_hints: Vec<String>,
    pub timeout: Duration,
}

impl GoogleVisionConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: defaults::GOOGLE_VISION_URL.to_string(),
            output_prefix: format!("gs://{}/ocr-output/", defaults::GCS_BUCKET),
            language_hints: defaults::OCR_LANGUAGE_HINTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            timeout: Duration::from_secs(defaults::OCR_REQUEST_TIMEOUT_SECS),
        }
    }

    /// Load from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `GOOGLE_VISION_API_KEY` | required |
    /// | `GOOGLE_VISION_BASE_URL` | `https://vision.googleapis.com` |
    /// | `GOOGLE_VISION_OUTPUT_PREFIX` | `gs://<GCS_BUCKET_NAME>/ocr-output/` |
    /// | `OCR_LANGUAGE_HINTS` | `ar,en` |
    /// | `OCR_REQUEST_TIMEOUT_SECS` | `60` |
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GOOGLE_VISION_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::Config("GOOGLE_VISION_API_KEY is not set".to_string()))?;
        let mut config = Self::new(api_key);

        if let Ok(url) = std::env::var("GOOGLE_VISION_BASE_URL") {
            config.base_url = url;
        }
        config.output_prefix = match std::env::var("GOOGLE_VISION_OUTPUT_PREFIX") {
            Ok(prefix) => prefix,
            Err(_) => {
                let bucket = std::env::var("GCS_BUCKET_NAME")
                    .unwrap_or_else(|_| defaults::GCS_BUCKET.to_string());
                format!("gs://{bucket}/ocr-output/")
            }
        };
        if let Ok(hints) = std::env::var("OCR_LANGUAGE_HINTS") {
            config.language_hints = parse_language_hints(&hints);
        }
        if let Some(secs) = std::env::var("OCR_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_output_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.output_prefix = prefix.into();
        self
    }
}

/// Split a comma-separated hint list, dropping blanks.
pub fn parse_language_hints(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// MIME type accepted by `files:asyncBatchAnnotate`, if the location is a file document.
fn file_mime_type(location: &str) -> Option<&'static str> {
    let ext = location.rsplit('.').next()?.to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some("application/pdf"),
        "tif" | "tiff" => Some("image/tiff"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

// Wire types

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Feature {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageContext<'a> {
    language_hints: &'a [String],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GcsUri<'a> {
    uri: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OutputConfig<'a> {
    gcs_destination: GcsUri<'a>,
    batch_size: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InputConfig<'a> {
    gcs_source: GcsUri<'a>,
    mime_type: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FileRequest<'a> {
    input_config: InputConfig<'a>,
    features: [Feature; 1],
    image_context: ImageContext<'a>,
    output_config: OutputConfig<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageSource<'a> {
    image_uri: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Image<'a> {
    source: ImageSource<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageRequest<'a> {
    image: Image<'a>,
    features: [Feature; 1],
    image_context: ImageContext<'a>,
}

#[derive(Serialize)]
struct FilesBatch<'a> {
    requests: [FileRequest<'a>; 1],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImagesBatch<'a> {
    requests: [ImageRequest<'a>; 1],
    output_config: OutputConfig<'a>,
}

#[derive(Deserialize)]
struct OperationHandle {
    name: String,
}

#[derive(Deserialize)]
struct Status {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct Operation {
    #[serde(default)]
    done: bool,
    error: Option<Status>,
    response: Option<JsonValue>,
}

impl Operation {
    /// First `gcsDestination.uri` found in the operation response.
    fn output_uri(&self) -> Option<String> {
        let response = self.response.as_ref()?;
        response
            .pointer("/outputConfig/gcsDestination/uri")
            .or_else(|| response.pointer("/responses/0/outputConfig/gcsDestination/uri"))
            .and_then(JsonValue::as_str)
            .map(str::to_string)
    }
}

/// Google Cloud Vision OCR provider.
pub struct GoogleVisionProvider {
    client: Client,
    config: GoogleVisionConfig,
}

impl GoogleVisionProvider {
    pub fn new(config: GoogleVisionConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(GoogleVisionConfig::from_env()?)
    }

    fn output_folder(&self) -> String {
        let prefix = self.config.output_prefix.trim_end_matches('/');
        format!("{prefix}/{}/", Uuid::new_v4())
    }

    fn start_request(&self, input_location: &str, output: &str) -> Result<(String, JsonValue)> {
        let features = [Feature {
            kind: "DOCUMENT_TEXT_DETECTION",
        }];
        let image_context = ImageContext {
            language_hints: &self.config.language_hints,
        };
        let output_config = OutputConfig {
            gcs_destination: GcsUri { uri: output },
            batch_size: 20,
        };

        let (path, body) = match file_mime_type(input_location) {
            Some(mime_type) => (
                "files:asyncBatchAnnotate",
                serde_json::to_value(FilesBatch {
                    requests: [FileRequest {
                        input_config: InputConfig {
                            gcs_source: GcsUri {
                                uri: input_location,
                            },
                            mime_type,
                        },
                        features,
                        image_context,
                        output_config,
                    }],
                })?,
            ),
            None => (
                "images:asyncBatchAnnotate",
                serde_json::to_value(ImagesBatch {
                    requests: [ImageRequest {
                        image: Image {
                            source: ImageSource {
                                image_uri: input_location,
                            },
                        },
                        features,
                        image_context,
                    }],
                    output_config,
                })?,
            ),
        };

        let base = self.config.base_url.trim_end_matches('/');
        Ok((format!("{base}/v1/{path}"), body))
    }
}

#[async_trait]
impl OcrProvider for GoogleVisionProvider {
    fn name(&self) -> &'static str {
        "google"
    }

    #[instrument(skip(self), fields(subsystem = "ocr", component = "google", op = "start"))]
    async fn start(&self, input_location: &str) -> Result<StartOutcome> {
        let output = self.output_folder();
        let (url, body) = self.start_request(input_location, &output)?;

        let response = self
            .client
            .post(url)
            .query(&[("key", self.config.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if rejects_request(status) {
            let body = response.text().await.unwrap_or_default();
            warn!(http_status = status.as_u16(), "Vision rejected OCR request");
            return Ok(StartOutcome::rejected(format!(
                "Vision returned {status}: {body}"
            )));
        }
        if !status.is_success() {
            warn!(http_status = status.as_u16(), "Vision start failed, will retry");
            return Err(Error::Provider(format!("Vision returned {status}")));
        }

        let handle: OperationHandle = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("Failed to parse operation: {e}")))?;
        debug!(provider_op_id = %handle.name, output = %output, "Vision operation started");
        Ok(StartOutcome::accepted(handle.name))
    }

    #[instrument(skip(self), fields(subsystem = "ocr", component = "google", op = "poll"))]
    async fn poll(&self, operation_id: &str) -> Result<PollOutcome> {
        let base = self.config.base_url.trim_end_matches('/');
        let response = self
            .client
            .get(format!("{base}/v1/{operation_id}"))
            .query(&[("key", self.config.api_key.as_str())])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(PollOutcome::failed(format!(
                "operation {operation_id} not found"
            )));
        }
        if !status.is_success() {
            return Err(Error::Provider(format!("Vision returned {status}")));
        }

        let operation: Operation = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("Failed to parse operation: {e}")))?;

        if !operation.done {
            return Ok(PollOutcome::running());
        }
        if let Some(error) = &operation.error {
            return Ok(PollOutcome::failed(format!(
                "Vision error {}: {}",
                error.code, error.message
            )));
        }

        let mut outcome = PollOutcome::succeeded(None);
        if let Some(uri) = operation.output_uri() {
            outcome = outcome.with_output_location(uri);
        }
        Ok(outcome)
    }
}
