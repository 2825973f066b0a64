//! Provider selection.
//!
//! The provider is chosen once at startup from `OCR_PROVIDER` and handed to
//! the scheduler as a single tagged value.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::info;

use assetreg_core::{defaults, Error, OcrProvider, PollOutcome, Result, StartOutcome};

use crate::azure::AzureReadProvider;
use crate::fake::FakeOcrProvider;
use crate::google::GoogleVisionProvider;
#[cfg(any(test, feature = "mock"))]
use crate::mock::MockOcrProvider;

/// Configured provider family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Fake,
    Google,
    Azure,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Fake => "fake",
            ProviderKind::Google => "google",
            ProviderKind::Azure => "azure",
        }
    }

    /// Read `OCR_PROVIDER`, defaulting to `fake`.
    pub fn from_env() -> Result<Self> {
        std::env::var("OCR_PROVIDER")
            .unwrap_or_else(|_| defaults::OCR_PROVIDER.to_string())
            .parse()
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fake" => Ok(ProviderKind::Fake),
            "google" => Ok(ProviderKind::Google),
            "azure" => Ok(ProviderKind::Azure),
            other => Err(Error::Config(format!(
                "unknown OCR provider '{other}' (expected fake, google or azure)"
            ))),
        }
    }
}

/// The OCR provider in use.
pub enum OcrProviderClient {
    Fake(FakeOcrProvider),
    Google(GoogleVisionProvider),
    Azure(AzureReadProvider),
    #[cfg(any(test, feature = "mock"))]
    Mock(MockOcrProvider),
}

impl OcrProviderClient {
    /// Build the provider named by `kind`, reading its settings from the environment.
    pub fn for_kind(kind: ProviderKind) -> Result<Self> {
        let client = match kind {
            ProviderKind::Fake => OcrProviderClient::Fake(FakeOcrProvider::new()),
            ProviderKind::Google => OcrProviderClient::Google(GoogleVisionProvider::from_env()?),
            ProviderKind::Azure => OcrProviderClient::Azure(AzureReadProvider::from_env()?),
        };
        info!(
            subsystem = "ocr",
            component = "provider",
            op = "select",
            provider = kind.as_str(),
            "OCR provider selected"
        );
        Ok(client)
    }

    /// Select and build the provider from `OCR_PROVIDER`.
    pub fn from_env() -> Result<Self> {
        Self::for_kind(ProviderKind::from_env()?)
    }

    fn inner(&self) -> &dyn OcrProvider {
        match self {
            OcrProviderClient::Fake(p) => p,
            OcrProviderClient::Google(p) => p,
            OcrProviderClient::Azure(p) => p,
            #[cfg(any(test, feature = "mock"))]
            OcrProviderClient::Mock(p) => p,
        }
    }
}

/// Whether a 4xx answer to a start request is a verdict on the request
/// itself. 408, 429, 401 and 403 are left to the retry path.
pub(crate) fn rejects_request(status: StatusCode) -> bool {
    status.is_client_error()
        && !matches!(
            status,
            StatusCode::REQUEST_TIMEOUT
                | StatusCode::TOO_MANY_REQUESTS
                | StatusCode::UNAUTHORIZED
                | StatusCode::FORBIDDEN
        )
}

#[async_trait]
impl OcrProvider for OcrProviderClient {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    async fn start(&self, input_location: &str) -> Result<StartOutcome> {
        self.inner().start(input_location).await
    }

    async fn poll(&self, operation_id: &str) -> Result<PollOutcome> {
        self.inner().poll(operation_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_parsing() {
        assert_eq!("fake".parse::<ProviderKind>().unwrap(), ProviderKind::Fake);
        assert_eq!("Google".parse::<ProviderKind>().unwrap(), ProviderKind::Google);
        assert_eq!(" AZURE ".parse::<ProviderKind>().unwrap(), ProviderKind::Azure);
        assert!(matches!(
            "tesseract".parse::<ProviderKind>(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_rejects_request_classification() {
        assert!(rejects_request(StatusCode::BAD_REQUEST));
        assert!(rejects_request(StatusCode::UNPROCESSABLE_ENTITY));
        assert!(!rejects_request(StatusCode::REQUEST_TIMEOUT));
        assert!(!rejects_request(StatusCode::TOO_MANY_REQUESTS));
        assert!(!rejects_request(StatusCode::UNAUTHORIZED));
        assert!(!rejects_request(StatusCode::FORBIDDEN));
        assert!(!rejects_request(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[tokio::test]
    async fn test_client_dispatches_to_variant() {
        let client = OcrProviderClient::for_kind(ProviderKind::Fake).unwrap();
        assert_eq!(client.name(), "fake");
        let StartOutcome::Accepted { operation_id } = client.start("gs://b/x.pdf").await.unwrap()
        else {
            panic!("fake provider must accept");
        };
        assert!(client.poll(&operation_id).await.unwrap().success);

        let mock = MockOcrProvider::new();
        let client = OcrProviderClient::Mock(mock.clone());
        assert_eq!(client.name(), "mock");
        client.start("gs://b/x.pdf").await.unwrap();
        assert_eq!(mock.start_count(), 1);
    }
}
