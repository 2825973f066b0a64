//! Azure Computer Vision Read API provider.
//!
//! `start` posts the document URL to `read/analyze` and keeps the result id
//! from the `Operation-Location` header. `poll` fetches
//! `read/analyzeResults/{id}` and, once it succeeded, returns the recognized
//! lines as text together with the mean word confidence.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use assetreg_core::defaults;
use assetreg_core::{Error, OcrProvider, PollOutcome, Result, StartOutcome};

use crate::provider::rejects_request;

const READ_API_PATH: &str = "vision/v3.2/read";
const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Azure Read API connection settings.
#[derive(Debug, Clone)]
pub struct AzureReadConfig {
    pub endpoint: String,
    pub key: String,
    pub timeout: Duration,
}

impl AzureReadConfig {
    pub fn new(endpoint: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            key: key.into(),
            timeout: Duration::from_secs(defaults::OCR_REQUEST_TIMEOUT_SECS),
        }
    }

    /// Load `AZURE_VISION_ENDPOINT` and `AZURE_VISION_KEY` (both required).
    pub fn from_env() -> Result<Self> {
        let required = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| Error::Config(format!("{name} is not set")))
        };
        let mut config = Self::new(
            required("AZURE_VISION_ENDPOINT")?,
            required("AZURE_VISION_KEY")?,
        );
        if let Some(secs) = std::env::var("OCR_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    url: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadOperation {
    status: String,
    analyze_result: Option<AnalyzeResult>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResult {
    #[serde(default)]
    read_results: Vec<ReadResult>,
}

#[derive(Deserialize)]
struct ReadResult {
    #[serde(default)]
    lines: Vec<Line>,
}

#[derive(Deserialize)]
struct Line {
    text: String,
    #[serde(default)]
    words: Vec<Word>,
}

#[derive(Deserialize)]
struct Word {
    confidence: Option<f64>,
}

impl AnalyzeResult {
    fn text(&self) -> String {
        self.read_results
            .iter()
            .flat_map(|page| page.lines.iter().map(|line| line.text.as_str()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Mean of every reported word confidence, clamped to `[0, 1]`.
    fn mean_confidence(&self) -> Option<f64> {
        let confidences: Vec<f64> = self
            .read_results
            .iter()
            .flat_map(|page| &page.lines)
            .flat_map(|line| &line.words)
            .filter_map(|word| word.confidence)
            .collect();
        if confidences.is_empty() {
            return None;
        }
        let mean = confidences.iter().sum::<f64>() / confidences.len() as f64;
        Some(mean.clamp(0.0, 1.0))
    }
}

/// Azure Computer Vision OCR provider.
pub struct AzureReadProvider {
    client: Client,
    config: AzureReadConfig,
}

impl AzureReadProvider {
    pub fn new(config: AzureReadConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(AzureReadConfig::from_env()?)
    }

    fn api_url(&self, suffix: &str) -> String {
        let endpoint = self.config.endpoint.trim_end_matches('/');
        format!("{endpoint}/{READ_API_PATH}/{suffix}")
    }
}

/// Result id at the end of an `Operation-Location` URL.
fn operation_id_from_location(location: &str) -> Option<&str> {
    location
        .split('?')
        .next()
        .and_then(|path| path.trim_end_matches('/').rsplit('/').next())
        .filter(|id| !id.is_empty())
}

#[async_trait]
impl OcrProvider for AzureReadProvider {
    fn name(&self) -> &'static str {
        "azure"
    }

    #[instrument(skip(self), fields(subsystem = "ocr", component = "azure", op = "start"))]
    async fn start(&self, input_location: &str) -> Result<StartOutcome> {
        let response = self
            .client
            .post(self.api_url("analyze"))
            .header(SUBSCRIPTION_KEY_HEADER, &self.config.key)
            .json(&AnalyzeRequest {
                url: input_location,
            })
            .send()
            .await?;

        let status = response.status();
        if rejects_request(status) {
            let body = response.text().await.unwrap_or_default();
            warn!(http_status = status.as_u16(), "Read API rejected OCR request");
            return Ok(StartOutcome::rejected(format!(
                "Read API returned {status}: {body}"
            )));
        }
        if !status.is_success() {
            warn!(http_status = status.as_u16(), "Read API start failed, will retry");
            return Err(Error::Provider(format!("Read API returned {status}")));
        }

        let operation_id = response
            .headers()
            .get("Operation-Location")
            .and_then(|v| v.to_str().ok())
            .and_then(operation_id_from_location)
            .map(str::to_string)
            .ok_or_else(|| {
                Error::Provider("Read API response has no Operation-Location".to_string())
            })?;

        debug!(provider_op_id = %operation_id, "Read operation started");
        Ok(StartOutcome::accepted(operation_id))
    }

    #[instrument(skip(self), fields(subsystem = "ocr", component = "azure", op = "poll"))]
    async fn poll(&self, operation_id: &str) -> Result<PollOutcome> {
        let response = self
            .client
            .get(self.api_url(&format!("analyzeResults/{operation_id}")))
            .header(SUBSCRIPTION_KEY_HEADER, &self.config.key)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(PollOutcome::failed(format!(
                "operation {operation_id} not found"
            )));
        }
        if !status.is_success() {
            return Err(Error::Provider(format!("Read API returned {status}")));
        }

        let operation: ReadOperation = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("Failed to parse read result: {e}")))?;

        match operation.status.to_ascii_lowercase().as_str() {
            "notstarted" | "running" => Ok(PollOutcome::running()),
            "succeeded" => {
                let Some(result) = operation.analyze_result else {
                    return Ok(PollOutcome::succeeded(None));
                };
                Ok(PollOutcome::succeeded(result.mean_confidence()).with_text(result.text()))
            }
            "failed" => Ok(PollOutcome::failed("Read API reported failure")),
            other => Err(Error::Provider(format!("unknown Read API status: {other}"))),
        }
    }
}
