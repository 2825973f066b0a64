//! Document status projector.
//!
//! Pushes interim (`Processing`) and terminal OCR outcomes onto the owning
//! document so the rest of the application never has to read jobs.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use assetreg_core::{
    extract_fields, DocumentOcrStatus, DocumentStatusSink, OcrJobStatus, OcrOutcome, PollOutcome,
    Result,
};

use crate::state_machine::Transition;

/// Document outcome for a transition, if it must be projected at all.
///
/// Only the first entry into `Processing` and terminal transitions are
/// projected. Confidence, text and extracted fields travel with accepted
/// results (`Succeeded`, `LowConfidence`).
pub fn outcome_for(transition: &Transition, poll: Option<&PollOutcome>) -> Option<OcrOutcome> {
    if transition.entered_processing() && !transition.is_terminal() {
        return Some(OcrOutcome::status(DocumentOcrStatus::Processing));
    }
    if !transition.is_terminal() {
        return None;
    }

    let mut outcome = OcrOutcome::status(transition.to.into());
    if matches!(
        transition.to,
        OcrJobStatus::Succeeded | OcrJobStatus::LowConfidence
    ) {
        if let Some(poll) = poll {
            outcome.confidence = poll.mean_confidence;
            outcome.text = poll.text.clone();
            if let Some(text) = &poll.text {
                outcome.fields = extract_fields(text);
            }
            outcome
                .fields
                .extend(poll.fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
    }
    Some(outcome)
}

/// Writes outcomes through a [`DocumentStatusSink`].
#[derive(Clone)]
pub struct DocumentProjector {
    sink: Arc<dyn DocumentStatusSink>,
}

impl DocumentProjector {
    pub fn new(sink: Arc<dyn DocumentStatusSink>) -> Self {
        Self { sink }
    }

    /// Project the outcome of `transition`, if any. Returns whether the
    /// document changed.
    pub async fn project(
        &self,
        document_id: Uuid,
        transition: &Transition,
        poll: Option<&PollOutcome>,
    ) -> Result<bool> {
        let Some(outcome) = outcome_for(transition, poll) else {
            return Ok(false);
        };

        let changed = self.sink.set_ocr_outcome(document_id, &outcome).await?;
        debug!(
            subsystem = "jobs",
            component = "projector",
            op = "project",
            document_id = %document_id,
            status = %outcome.status,
            changed,
            "Document OCR status projected"
        );
        Ok(changed)
    }
}
