//! OCR job state machine.
//!
//! Everything here is pure: given a job and what the provider answered, it
//! computes the next status and the field mutations, without touching the
//! store, the provider or the clock.
//!
//! | Current | Provider result | Next |
//! |---------|-----------------|------|
//! | Pending/Queued | start accepted | Processing |
//! | Pending/Queued | start rejected, or no input location | Failed |
//! | Processing | poll not done | Processing (unchanged) |
//! | Processing | done, success, confidence >= threshold or absent | Succeeded |
//! | Processing | done, success, confidence < threshold | LowConfidence |
//! | Processing | done, failure, or no operation id | Failed |
//!
//! A `Pending`/`Queued` job that already carries a provider operation id is
//! polled like a `Processing` one, so an operation is never started twice.

use assetreg_core::{Error, OcrJob, OcrJobStatus, PollOutcome, Result, StartOutcome};

/// `last_error` of a startable job without input location.
pub const MISSING_INPUT_ERROR: &str = "missing input location";

/// `last_error` of a processing job without provider operation id.
pub const MISSING_OPERATION_ERROR: &str = "missing provider operation id";

/// `last_error` when the provider reports a failure without a reason.
pub const UNKNOWN_PROVIDER_ERROR: &str = "OCR failed";

/// Provider call a claimed job needs next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Start { input_location: String },
    Poll { operation_id: String },
    /// Nothing can be started: fail without calling the provider.
    FailMissingInput,
    /// Nothing can be polled: fail without calling the provider.
    FailMissingOperation,
}

/// Decide which provider call a job needs.
pub fn plan(job: &OcrJob) -> Result<Action> {
    if job.status.is_terminal() {
        return Err(Error::InvalidTransition(format!(
            "job {} is {} and cannot be advanced",
            job.id, job.status
        )));
    }

    if let Some(operation_id) = &job.provider_op_id {
        return Ok(Action::Poll {
            operation_id: operation_id.clone(),
        });
    }

    if job.status.is_startable() {
        return Ok(match &job.input_location {
            Some(input_location) => Action::Start {
                input_location: input_location.clone(),
            },
            None => Action::FailMissingInput,
        });
    }

    Ok(Action::FailMissingOperation)
}

/// What came back for an [`Action`].
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderResult {
    Started(StartOutcome),
    Polled(PollOutcome),
    MissingInput,
    MissingOperation,
}

/// A single field change.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    SetProviderOpId(String),
    IncrementAttempts,
    SetLastError(String),
    ClearLastError,
    SetOutputLocation(String),
    ClearLease,
}

/// Result of [`decide`].
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: OcrJobStatus,
    pub to: OcrJobStatus,
    pub mutations: Vec<Mutation>,
}

impl Transition {
    fn new(from: OcrJobStatus, to: OcrJobStatus) -> Self {
        Self {
            from,
            to,
            mutations: Vec::new(),
        }
    }

    fn with(mut self, mutation: Mutation) -> Self {
        self.mutations.push(mutation);
        self
    }

    /// Nothing to persist: the operation is still in flight.
    pub fn is_noop(&self) -> bool {
        self.from == self.to && self.mutations.is_empty()
    }

    /// The job just left `Pending`/`Queued` for `Processing`.
    pub fn entered_processing(&self) -> bool {
        self.from.is_startable() && self.to == OcrJobStatus::Processing
    }

    pub fn is_terminal(&self) -> bool {
        self.to.is_terminal()
    }

    /// Apply status and mutations to `job`.
    pub fn apply(&self, job: &mut OcrJob) {
        job.status = self.to;
        for mutation in &self.mutations {
            match mutation {
                Mutation::SetProviderOpId(id) => job.provider_op_id = Some(id.clone()),
                Mutation::IncrementAttempts => job.attempts += 1,
                Mutation::SetLastError(error) => job.last_error = Some(error.clone()),
                Mutation::ClearLastError => job.last_error = None,
                Mutation::SetOutputLocation(location) => {
                    job.output_location = Some(location.clone())
                }
                Mutation::ClearLease => job.clear_lease(),
            }
        }
    }
}

/// Status of a finished, successful OCR run.
///
/// Inclusive at the boundary; a missing confidence cannot fail the check.
pub fn accepted_status(confidence: Option<f64>, threshold: f64) -> OcrJobStatus {
    match confidence {
        Some(c) if c < threshold => OcrJobStatus::LowConfidence,
        _ => OcrJobStatus::Succeeded,
    }
}

/// Compute the transition of `job` given the provider's answer.
pub fn decide(job: &OcrJob, result: &ProviderResult, threshold: f64) -> Result<Transition> {
    let from = job.status;
    if from.is_terminal() {
        return Err(Error::InvalidTransition(format!(
            "job {} is {} and cannot be advanced",
            job.id, from
        )));
    }

    let transition = match result {
        ProviderResult::Started(outcome) => {
            if !from.is_startable() {
                return Err(Error::InvalidTransition(format!(
                    "job {} is {} and cannot be started",
                    job.id, from
                )));
            }
            match outcome {
                StartOutcome::Accepted { operation_id } => {
                    Transition::new(from, OcrJobStatus::Processing)
                        .with(Mutation::SetProviderOpId(operation_id.clone()))
                        .with(Mutation::IncrementAttempts)
                        .with(Mutation::ClearLastError)
                }
                StartOutcome::Rejected { error } => Transition::new(from, OcrJobStatus::Failed)
                    .with(Mutation::SetLastError(error.clone()))
                    .with(Mutation::IncrementAttempts)
                    .with(Mutation::ClearLease),
            }
        }

        ProviderResult::MissingInput => {
            if !from.is_startable() {
                return Err(Error::InvalidTransition(format!(
                    "job {} is {} and has nothing to start",
                    job.id, from
                )));
            }
            Transition::new(from, OcrJobStatus::Failed)
                .with(Mutation::SetLastError(MISSING_INPUT_ERROR.to_string()))
                .with(Mutation::IncrementAttempts)
                .with(Mutation::ClearLease)
        }

        ProviderResult::MissingOperation => Transition::new(from, OcrJobStatus::Failed)
            .with(Mutation::SetLastError(MISSING_OPERATION_ERROR.to_string()))
            .with(Mutation::ClearLease),

        ProviderResult::Polled(poll) => {
            if job.provider_op_id.is_none() {
                return Err(Error::InvalidTransition(format!(
                    "job {} has no provider operation to poll",
                    job.id
                )));
            }

            // A startable job with an operation id is adopted into
            // Processing as if its start had just been accepted.
            let mut adopted = if from.is_startable() {
                Transition::new(from, OcrJobStatus::Processing)
                    .with(Mutation::IncrementAttempts)
                    .with(Mutation::ClearLastError)
            } else {
                Transition::new(from, OcrJobStatus::Processing)
            };

            if !poll.done {
                return Ok(adopted);
            }

            if poll.success {
                adopted.to = accepted_status(poll.mean_confidence, threshold);
                if let Some(location) = &poll.output_location {
                    adopted = adopted.with(Mutation::SetOutputLocation(location.clone()));
                }
                adopted.with(Mutation::ClearLastError).with(Mutation::ClearLease)
            } else {
                adopted.to = OcrJobStatus::Failed;
                let error = poll
                    .error
                    .clone()
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(|| UNKNOWN_PROVIDER_ERROR.to_string());
                adopted.with(Mutation::SetLastError(error)).with(Mutation::ClearLease)
            }
        }
    };

    Ok(transition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    const THRESHOLD: f64 = 0.85;

    fn job(status: OcrJobStatus, op: Option<&str>) -> OcrJob {
        let now = Utc::now();
        let mut job = OcrJob::new(Uuid::new_v4(), Some("gs://assets-dev/a.pdf".into()), now);
        job.status = status;
        job.provider_op_id = op.map(str::to_string);
        job.claim("worker-1", Duration::seconds(120), now);
        job
    }

    fn advance(job: &OcrJob, result: ProviderResult) -> OcrJob {
        let transition = decide(job, &result, THRESHOLD).unwrap();
        let mut next = job.clone();
        transition.apply(&mut next);
        next
    }

    #[test]
    fn test_plan() {
        let queued = job(OcrJobStatus::Queued, None);
        assert_eq!(
            plan(&queued).unwrap(),
            Action::Start {
                input_location: "gs://assets-dev/a.pdf".into()
            }
        );

        let mut no_input = queued.clone();
        no_input.input_location = None;
        assert_eq!(plan(&no_input).unwrap(), Action::FailMissingInput);

        let processing = job(OcrJobStatus::Processing, Some("op-1"));
        assert_eq!(
            plan(&processing).unwrap(),
            Action::Poll {
                operation_id: "op-1".into()
            }
        );

        let orphan = job(OcrJobStatus::Processing, None);
        assert_eq!(plan(&orphan).unwrap(), Action::FailMissingOperation);

        assert!(plan(&job(OcrJobStatus::Failed, None)).is_err());
    }

    #[test]
    fn test_plan_polls_started_queued_job() {
        let queued = job(OcrJobStatus::Queued, Some("op-9"));
        assert_eq!(
            plan(&queued).unwrap(),
            Action::Poll {
                operation_id: "op-9".into()
            }
        );
    }

    #[test]
    fn test_start_accepted() {
        let mut pending = job(OcrJobStatus::Pending, None);
        pending.last_error = Some("old".into());
        let next = advance(
            &pending,
            ProviderResult::Started(StartOutcome::accepted("op-1")),
        );

        assert_eq!(next.status, OcrJobStatus::Processing);
        assert_eq!(next.provider_op_id.as_deref(), Some("op-1"));
        assert_eq!(next.attempts, 1);
        assert_eq!(next.last_error, None);
        // lease is kept while the operation is in flight
        assert_eq!(next.lease_owner.as_deref(), Some("worker-1"));
    }

    #[test]
    fn test_start_rejected() {
        let queued = job(OcrJobStatus::Queued, None);
        let next = advance(
            &queued,
            ProviderResult::Started(StartOutcome::rejected("quota exceeded")),
        );

        assert_eq!(next.status, OcrJobStatus::Failed);
        assert_eq!(next.last_error.as_deref(), Some("quota exceeded"));
        assert_eq!(next.attempts, 1);
        assert!(next.lease_owner.is_none());
    }

    #[test]
    fn test_missing_input() {
        let mut queued = job(OcrJobStatus::Queued, None);
        queued.input_location = None;
        let next = advance(&queued, ProviderResult::MissingInput);
        assert_eq!(next.status, OcrJobStatus::Failed);
        assert_eq!(next.last_error.as_deref(), Some(MISSING_INPUT_ERROR));
        assert_eq!(next.attempts, 1);
    }

    #[test]
    fn test_missing_operation() {
        let processing = job(OcrJobStatus::Processing, None);
        let next = advance(&processing, ProviderResult::MissingOperation);
        assert_eq!(next.status, OcrJobStatus::Failed);
        assert_eq!(next.last_error.as_deref(), Some(MISSING_OPERATION_ERROR));
        assert_eq!(next.attempts, 0);
        assert!(next.lease_until.is_none());
    }

    #[test]
    fn test_poll_not_done_is_noop() {
        let processing = job(OcrJobStatus::Processing, Some("op-1"));
        let transition = decide(
            &processing,
            &ProviderResult::Polled(PollOutcome::running()),
            THRESHOLD,
        )
        .unwrap();
        assert!(transition.is_noop());
    }

    #[test]
    fn test_poll_success() {
        let processing = job(OcrJobStatus::Processing, Some("op-1"));
        let next = advance(
            &processing,
            ProviderResult::Polled(
                PollOutcome::succeeded(Some(0.92)).with_output_location("gs://out/1/"),
            ),
        );
        assert_eq!(next.status, OcrJobStatus::Succeeded);
        assert_eq!(next.output_location.as_deref(), Some("gs://out/1/"));
        assert!(next.lease_owner.is_none());
        assert!(next.lease_until.is_none());
    }

    #[test]
    fn test_poll_failure() {
        let processing = job(OcrJobStatus::Processing, Some("op-1"));
        let next = advance(
            &processing,
            ProviderResult::Polled(PollOutcome::failed("provider timeout")),
        );
        assert_eq!(next.status, OcrJobStatus::Failed);
        assert_eq!(next.last_error.as_deref(), Some("provider timeout"));
        assert!(next.lease_owner.is_none());
    }

    #[test]
    fn test_poll_failure_without_reason() {
        let processing = job(OcrJobStatus::Processing, Some("op-1"));
        let mut poll = PollOutcome::failed("");
        poll.error = None;
        let next = advance(&processing, ProviderResult::Polled(poll));
        assert_eq!(next.last_error.as_deref(), Some(UNKNOWN_PROVIDER_ERROR));
    }

    #[test]
    fn test_threshold_boundary() {
        assert_eq!(accepted_status(Some(0.85), 0.85), OcrJobStatus::Succeeded);
        assert_eq!(accepted_status(Some(0.84999), 0.85), OcrJobStatus::LowConfidence);
        assert_eq!(accepted_status(None, 0.85), OcrJobStatus::Succeeded);
        assert_eq!(accepted_status(Some(1.0), 1.0), OcrJobStatus::Succeeded);
        assert_eq!(accepted_status(Some(0.0), 0.0), OcrJobStatus::Succeeded);
    }

    #[test]
    fn test_low_confidence_keeps_output() {
        let processing = job(OcrJobStatus::Processing, Some("op-1"));
        let next = advance(
            &processing,
            ProviderResult::Polled(
                PollOutcome::succeeded(Some(0.5)).with_output_location("gs://out/2/"),
            ),
        );
        assert_eq!(next.status, OcrJobStatus::LowConfidence);
        assert_eq!(next.output_location.as_deref(), Some("gs://out/2/"));
        assert!(next.lease_owner.is_none());
    }

    #[test]
    fn test_adopted_operation_counts_as_attempt() {
        let queued = job(OcrJobStatus::Queued, Some("op-7"));

        let transition = decide(
            &queued,
            &ProviderResult::Polled(PollOutcome::running()),
            THRESHOLD,
        )
        .unwrap();
        assert!(transition.entered_processing());
        assert!(!transition.is_noop());

        let next = advance(&queued, ProviderResult::Polled(PollOutcome::succeeded(None)));
        assert_eq!(next.status, OcrJobStatus::Succeeded);
        assert_eq!(next.attempts, 1);
    }

    #[test]
    fn test_terminal_states_are_final() {
        for status in [
            OcrJobStatus::Succeeded,
            OcrJobStatus::Failed,
            OcrJobStatus::LowConfidence,
        ] {
            let done = job(status, Some("op-1"));
            for result in [
                ProviderResult::Started(StartOutcome::accepted("op-2")),
                ProviderResult::Polled(PollOutcome::succeeded(Some(1.0))),
                ProviderResult::MissingInput,
                ProviderResult::MissingOperation,
            ] {
                let err = decide(&done, &result, THRESHOLD).unwrap_err();
                assert!(matches!(err, Error::InvalidTransition(_)), "{status}");
            }
        }
    }

    #[test]
    fn test_start_result_for_processing_job_is_invalid() {
        let processing = job(OcrJobStatus::Processing, Some("op-1"));
        let err = decide(
            &processing,
            &ProviderResult::Started(StartOutcome::accepted("op-2")),
            THRESHOLD,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition(_)));
    }
}
