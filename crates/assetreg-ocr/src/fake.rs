//! Fake OCR provider for development environments without a cloud backend.
//!
//! Every start is accepted and the first poll of an operation completes it
//! with a synthetic text derived from the file name. Completed operations
//! are forgotten.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use assetreg_core::fields::OWNERSHIP_DOCUMENT_NUMBER;
use assetreg_core::{Error, OcrProvider, PollOutcome, Result, StartOutcome};

/// In-process provider that never leaves the machine.
#[derive(Default)]
pub struct FakeOcrProvider {
    operations: Mutex<HashMap<String, String>>,
}

impl FakeOcrProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

/// File name without directories and extension.
fn file_stem(location: &str) -> &str {
    let name = location.rsplit('/').next().unwrap_or(location);
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}

/// `DOC-<digits>` embedded anywhere in a file name.
fn document_number(name: &str) -> Option<String> {
    let idx = name.find("DOC-")?;
    let digits: String = name[idx + 4..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    (!digits.is_empty()).then(|| format!("DOC-{digits}"))
}

#[async_trait]
impl OcrProvider for FakeOcrProvider {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn start(&self, input_location: &str) -> Result<StartOutcome> {
        let operation_id = format!("fake-{}", Uuid::new_v4());
        self.operations
            .lock()
            .map_err(|_| Error::Internal("fake provider state poisoned".to_string()))?
            .insert(operation_id.clone(), input_location.to_string());

        debug!(
            subsystem = "ocr",
            component = "fake",
            op = "start",
            provider_op_id = %operation_id,
            "Fake OCR operation started"
        );
        Ok(StartOutcome::accepted(operation_id))
    }

    async fn poll(&self, operation_id: &str) -> Result<PollOutcome> {
        let location = self
            .operations
            .lock()
            .map_err(|_| Error::Internal("fake provider state poisoned".to_string()))?
            .remove(operation_id);

        let Some(location) = location else {
            return Ok(PollOutcome::failed(format!(
                "unknown fake operation {operation_id}"
            )));
        };

        let stem = file_stem(&location);
        let mut outcome = PollOutcome::succeeded(None).with_text(format!("[FAKE OCR] {stem}"));
        if let Some(number) = document_number(stem) {
            outcome = outcome.with_field(OWNERSHIP_DOCUMENT_NUMBER, number);
        }
        Ok(outcome)
    }
}
