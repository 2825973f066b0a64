//! Azure Read API provider against a mocked HTTP API.

use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use assetreg_core::{OcrProvider, StartOutcome};
use assetreg_ocr::{AzureReadConfig, AzureReadProvider};

fn provider(server: &MockServer) -> AzureReadProvider {
    AzureReadProvider::new(AzureReadConfig::new(server.uri(), "secret")).unwrap()
}

#[tokio::test]
async fn test_start_reads_operation_location() {
    let server = MockServer::start().await;
    let location = format!("{}/vision/v3.2/read/analyzeResults/res-42", server.uri());
    Mock::given(method("POST"))
        .and(path("/vision/v3.2/read/analyze"))
        .and(header("Ocp-Apim-Subscription-Key", "secret"))
        .respond_with(ResponseTemplate::new(202).insert_header("Operation-Location", location.as_str()))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = provider(&server)
        .start("https://storage.example/deed.pdf")
        .await
        .unwrap();
    assert_eq!(outcome, StartOutcome::accepted("res-42"));
}

#[tokio::test]
async fn test_start_without_operation_location_is_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;

    assert!(provider(&server)
        .start("https://storage.example/deed.pdf")
        .await
        .is_err());
}

async fn start_with_status(status: u16) -> assetreg_core::Result<StartOutcome> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/vision/v3.2/read/analyze"))
        .respond_with(ResponseTemplate::new(status).set_body_string("InvalidImageUrl"))
        .expect(1)
        .mount(&server)
        .await;
    provider(&server).start("https://storage.example/deed.pdf").await
}

#[tokio::test]
async fn test_start_bad_request_is_rejection() {
    match start_with_status(400).await.unwrap() {
        StartOutcome::Rejected { error } => assert!(error.contains("InvalidImageUrl")),
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_start_rate_limited_is_transient() {
    let err = start_with_status(429).await.unwrap_err();
    assert!(matches!(err, assetreg_core::Error::Provider(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_start_request_timeout_is_transient() {
    let err = start_with_status(408).await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_start_auth_failure_is_transient() {
    for status in [401, 403] {
        let err = start_with_status(status).await.unwrap_err();
        assert!(err.is_transient(), "{status}");
    }
}

#[tokio::test]
async fn test_poll_succeeded_reports_text_and_confidence() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/vision/v3.2/read/analyzeResults/res-42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "succeeded",
            "analyzeResult": {
                "readResults": [{
                    "page": 1,
                    "lines": [
                        { "text": "DOC-1234", "words": [{ "text": "DOC-1234", "confidence": 0.7 }] },
                        { "text": "2024-03-07", "words": [{ "text": "2024-03-07", "confidence": 0.9 }] }
                    ]
                }]
            }
        })))
        .mount(&server)
        .await;

    let outcome = provider(&server).poll("res-42").await.unwrap();
    assert!(outcome.done && outcome.success);
    assert_eq!(outcome.text.as_deref(), Some("DOC-1234\n2024-03-07"));
    assert!((outcome.mean_confidence.unwrap() - 0.8).abs() < 1e-9);
}

#[tokio::test]
async fn test_poll_running_and_failed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/vision/v3.2/read/analyzeResults/busy"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "running" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/vision/v3.2/read/analyzeResults/broken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "failed" })))
        .mount(&server)
        .await;

    let provider = provider(&server);
    assert!(!provider.poll("busy").await.unwrap().done);

    let failed = provider.poll("broken").await.unwrap();
    assert!(failed.done);
    assert!(!failed.success);
}
