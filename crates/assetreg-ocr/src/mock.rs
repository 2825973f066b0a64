//! Scriptable OCR provider for deterministic testing.
//!
//! ```rust,ignore
//! use assetreg_ocr::mock::MockOcrProvider;
//! use assetreg_core::{PollOutcome, StartOutcome};
//!
//! let provider = MockOcrProvider::new()
//!     .with_start(StartOutcome::accepted("op-1"))
//!     .with_poll(PollOutcome::succeeded(Some(0.92)));
//! ```
//!
//! Scripted responses are consumed in order; once a queue is empty, starts
//! are accepted with `mock-op-<n>` and polls report the operation as still
//! running. Clones share the script and the call log.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use assetreg_core::{Error, OcrProvider, PollOutcome, Result, StartOutcome};

/// Which provider call was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOperation {
    Start,
    Poll,
}

/// A recorded provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub operation: MockOperation,
    /// Input location for starts, operation id for polls.
    pub argument: String,
}

#[derive(Default)]
struct MockState {
    starts: VecDeque<std::result::Result<StartOutcome, String>>,
    polls: VecDeque<std::result::Result<PollOutcome, String>>,
    calls: Vec<MockCall>,
    started: usize,
}

/// Mock OCR provider.
#[derive(Clone, Default)]
pub struct MockOcrProvider {
    state: Arc<Mutex<MockState>>,
    latency: Duration,
}

impl MockOcrProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the answer to the next start call.
    pub fn with_start(self, outcome: StartOutcome) -> Self {
        self.state.lock().unwrap().starts.push_back(Ok(outcome));
        self
    }

    /// Queue a transport fault for the next start call.
    pub fn with_start_error(self, message: impl Into<String>) -> Self {
        self.state
            .lock()
            .unwrap()
            .starts
            .push_back(Err(message.into()));
        self
    }

    /// Queue the answer to the next poll call.
    pub fn with_poll(self, outcome: PollOutcome) -> Self {
        self.state.lock().unwrap().polls.push_back(Ok(outcome));
        self
    }

    /// Queue a transport fault for the next poll call.
    pub fn with_poll_error(self, message: impl Into<String>) -> Self {
        self.state
            .lock()
            .unwrap()
            .polls
            .push_back(Err(message.into()));
        self
    }

    /// Delay every call, to exercise cancellation.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Get all logged calls for assertion.
    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn start_count(&self) -> usize {
        self.count(MockOperation::Start)
    }

    pub fn poll_count(&self) -> usize {
        self.count(MockOperation::Poll)
    }

    fn count(&self, operation: MockOperation) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    fn record(&self, operation: MockOperation, argument: &str) {
        self.state.lock().unwrap().calls.push(MockCall {
            operation,
            argument: argument.to_string(),
        });
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl OcrProvider for MockOcrProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn start(&self, input_location: &str) -> Result<StartOutcome> {
        self.record(MockOperation::Start, input_location);
        self.simulate_latency().await;

        let mut state = self.state.lock().unwrap();
        state.started += 1;
        let fallback = StartOutcome::accepted(format!("mock-op-{}", state.started));
        match state.starts.pop_front() {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err(message)) => Err(Error::Provider(message)),
            None => Ok(fallback),
        }
    }

    async fn poll(&self, operation_id: &str) -> Result<PollOutcome> {
        self.record(MockOperation::Poll, operation_id);
        self.simulate_latency().await;

        match self.state.lock().unwrap().polls.pop_front() {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err(message)) => Err(Error::Provider(message)),
            None => Ok(PollOutcome::running()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_then_default() {
        let provider = MockOcrProvider::new()
            .with_start(StartOutcome::accepted("op-1"))
            .with_start_error("HTTP 503");

        assert_eq!(
            provider.start("gs://b/a.pdf").await.unwrap(),
            StartOutcome::accepted("op-1")
        );
        assert!(provider.start("gs://b/a.pdf").await.is_err());
        assert_eq!(
            provider.start("gs://b/a.pdf").await.unwrap(),
            StartOutcome::accepted("mock-op-3")
        );
        assert!(!provider.poll("op-1").await.unwrap().done);
    }

    #[tokio::test]
    async fn test_call_log_is_shared_between_clones() {
        let provider = MockOcrProvider::new();
        let observer = provider.clone();

        provider.start("gs://b/a.pdf").await.unwrap();
        provider.poll("mock-op-1").await.unwrap();

        assert_eq!(observer.start_count(), 1);
        assert_eq!(observer.poll_count(), 1);
        assert_eq!(
            observer.calls()[1],
            MockCall {
                operation: MockOperation::Poll,
                argument: "mock-op-1".to_string(),
            }
        );
    }
}
