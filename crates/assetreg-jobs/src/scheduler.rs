//! Lease scheduler: the OCR worker loop.
//!
//! Each scheduler instance repeatedly claims the oldest eligible job, makes
//! one provider call for it and persists the resulting transition. Instances
//! share nothing but the job store; exclusivity comes from the store's
//! atomic conditional claim.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, trace, warn};
use uuid::Uuid;

use assetreg_core::defaults;
use assetreg_core::{
    validate_input_location, DocumentStatusSink, Error, InputLocator, OcrJob, OcrJobStatus,
    OcrJobStore, OcrProvider, PollOutcome, Result,
};
use assetreg_db::Database;

use crate::projector::DocumentProjector;
use crate::state_machine::{decide, plan, Action, ProviderResult};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Configuration for a scheduler instance.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Whether the loop runs at all.
    pub enabled: bool,
    /// Sleep when no job is eligible.
    pub poll_interval: Duration,
    /// Validity window of a claim.
    pub lease_duration: Duration,
    /// Minimum mean confidence accepted as `Succeeded`.
    pub confidence_threshold: f64,
    /// Identity written to `lease_owner`.
    pub worker_id: String,
    /// Sleep after a fault caught at the loop boundary.
    pub error_backoff: Duration,
    /// Scheduler instances the host binary runs.
    pub worker_count: usize,
}

/// `<HOSTNAME>:<uuid>`, unique per process.
pub fn default_worker_id() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| "ocr-worker".to_string());
    format!("{host}:{}", Uuid::new_v4())
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_millis(defaults::OCR_POLL_INTERVAL_MS),
            lease_duration: Duration::from_secs(defaults::OCR_LEASE_DURATION_SECS),
            confidence_threshold: defaults::OCR_CONFIDENCE_THRESHOLD,
            worker_id: default_worker_id(),
            error_backoff: Duration::from_millis(defaults::OCR_ERROR_BACKOFF_MS),
            worker_count: defaults::OCR_WORKER_COUNT,
        }
    }
}

impl SchedulerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `OCR_WORKER_ENABLED` | `true` | Enable/disable the loop |
    /// | `OCR_POLL_INTERVAL_MS` | `5000` | Sleep when the queue is empty |
    /// | `OCR_LEASE_DURATION_SECS` | `120` | Claim validity |
    /// | `OCR_CONFIDENCE_THRESHOLD` | `0.85` | Acceptance threshold |
    /// | `OCR_WORKER_ID` | `<HOSTNAME>:<uuid>` | Lease owner identity |
    /// | `OCR_ERROR_BACKOFF_MS` | `2000` | Sleep after a loop fault |
    /// | `OCR_WORKER_COUNT` | `1` | Scheduler instances |
    pub fn from_env() -> Self {
        fn parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
            std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
        }

        let defaults = Self::default();

        let enabled = std::env::var("OCR_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        Self {
            enabled,
            poll_interval: parsed::<u64>("OCR_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            lease_duration: parsed::<u64>("OCR_LEASE_DURATION_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.lease_duration),
            confidence_threshold: parsed::<f64>("OCR_CONFIDENCE_THRESHOLD")
                .unwrap_or(defaults.confidence_threshold),
            worker_id: std::env::var("OCR_WORKER_ID")
                .ok()
                .filter(|id| !id.trim().is_empty())
                .unwrap_or(defaults.worker_id),
            error_backoff: parsed::<u64>("OCR_ERROR_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.error_backoff),
            worker_count: parsed::<usize>("OCR_WORKER_COUNT")
                .unwrap_or(defaults.worker_count)
                .max(1),
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_lease_duration(mut self, lease: Duration) -> Self {
        self.lease_duration = lease;
        self
    }

    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count.max(1);
        self
    }

    /// Reject settings the loop cannot run safely with.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(Error::Config(format!(
                "confidence threshold {} is outside [0, 1]",
                self.confidence_threshold
            )));
        }
        if self.lease_duration.is_zero() {
            return Err(Error::Config("lease duration must be positive".into()));
        }
        if self.lease_duration <= self.poll_interval {
            return Err(Error::Config(format!(
                "lease duration ({:?}) must exceed the poll interval ({:?})",
                self.lease_duration, self.poll_interval
            )));
        }
        if self.worker_id.trim().is_empty() {
            return Err(Error::Config("worker id must not be empty".into()));
        }
        if self.worker_id.len() > defaults::LEASE_OWNER_MAX_LEN {
            return Err(Error::Config(format!(
                "worker id exceeds {} bytes",
                defaults::LEASE_OWNER_MAX_LEN
            )));
        }
        Ok(())
    }
}

// =============================================================================
// EVENTS
// =============================================================================

/// Event emitted by a scheduler instance.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    WorkerStarted {
        worker_id: String,
    },
    /// This instance took the lease on a job.
    JobClaimed {
        job_id: Uuid,
    },
    /// Another instance claimed the job between read and claim.
    ClaimLost {
        job_id: Uuid,
    },
    /// The lease lapsed during the provider call; the result was discarded.
    LeaseLost {
        job_id: Uuid,
    },
    /// The provider accepted a start request.
    JobStarted {
        job_id: Uuid,
        provider_op_id: String,
    },
    JobPolled {
        job_id: Uuid,
        done: bool,
    },
    /// The job reached a terminal status.
    JobSettled {
        job_id: Uuid,
        document_id: Uuid,
        status: OcrJobStatus,
    },
    /// A fault was caught at the loop boundary.
    LoopError {
        error: String,
    },
    WorkerStopped {
        worker_id: String,
    },
}

/// Outcome of one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// No eligible job.
    Idle,
    /// The claim was lost to another instance.
    LostRace(Uuid),
    /// The lease lapsed before the result could be persisted; nothing was
    /// written to the job or its document.
    LeaseLost(Uuid),
    /// The job moved to a new status.
    Advanced { job_id: Uuid, status: OcrJobStatus },
    /// The provider operation is still in flight; nothing was persisted.
    StillRunning(Uuid),
    /// Shutdown was requested; a claimed job keeps its lease.
    Cancelled,
}

// =============================================================================
// HANDLE
// =============================================================================

/// Handle for controlling a running scheduler.
pub struct SchedulerHandle {
    shutdown: Arc<watch::Sender<bool>>,
    event_rx: broadcast::Receiver<SchedulerEvent>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal the scheduler to stop. In-flight provider calls are abandoned.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Get a receiver for scheduler events.
    pub fn events(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.event_rx.resubscribe()
    }

    /// Signal shutdown and wait for the loop to exit.
    pub async fn stop(self) -> Result<()> {
        self.shutdown();
        self.task
            .await
            .map_err(|e| Error::Internal(format!("scheduler task failed: {e}")))
    }
}

// =============================================================================
// SCHEDULER
// =============================================================================

/// Resolves once the shutdown flag is set.
async fn shutdown_requested(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// One worker instance.
pub struct LeaseScheduler {
    store: Arc<dyn OcrJobStore>,
    provider: Arc<dyn OcrProvider>,
    projector: DocumentProjector,
    inputs: Option<Arc<dyn InputLocator>>,
    config: SchedulerConfig,
    event_tx: broadcast::Sender<SchedulerEvent>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl LeaseScheduler {
    pub fn new(
        store: Arc<dyn OcrJobStore>,
        provider: Arc<dyn OcrProvider>,
        documents: Arc<dyn DocumentStatusSink>,
        config: SchedulerConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        let (shutdown, _) = watch::channel(false);
        Self {
            store,
            provider,
            projector: DocumentProjector::new(documents),
            inputs: None,
            config,
            event_tx,
            shutdown: Arc::new(shutdown),
        }
    }

    /// Scheduler over the PostgreSQL job store and document table.
    ///
    /// Jobs without an input location are started from their document's
    /// storage path in `GCS_BUCKET_NAME`.
    pub fn for_database(
        db: &Database,
        provider: Arc<dyn OcrProvider>,
        config: SchedulerConfig,
    ) -> Self {
        Self::new(
            Arc::new(db.jobs.clone()),
            provider,
            Arc::new(db.documents.clone()),
            config,
        )
        .with_input_locator(Arc::new(db.inputs.clone()))
    }

    /// Fallback for jobs enqueued without an input location.
    pub fn with_input_locator(mut self, inputs: Arc<dyn InputLocator>) -> Self {
        self.inputs = Some(inputs);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Get a receiver for scheduler events.
    pub fn events(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.event_tx.subscribe()
    }

    /// Validate the configuration and spawn the loop.
    pub fn start(self) -> Result<SchedulerHandle> {
        self.config.validate()?;

        let shutdown = self.shutdown.clone();
        let event_rx = self.event_tx.subscribe();
        let scheduler = Arc::new(self);
        let task = tokio::spawn(async move { scheduler.run().await });

        Ok(SchedulerHandle {
            shutdown,
            event_rx,
            task,
        })
    }

    fn emit(&self, event: SchedulerEvent) {
        let _ = self.event_tx.send(event);
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Run `fut` unless shutdown is requested first; `None` means cancelled.
    async fn unless_shutdown<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<Option<T>> {
        tokio::select! {
            biased;
            _ = shutdown_requested(self.shutdown.subscribe()) => Ok(None),
            result = fut => result.map(Some),
        }
    }

    /// Sleep for `duration`; returns true if shutdown was requested meanwhile.
    async fn sleep_or_shutdown(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = shutdown_requested(self.shutdown.subscribe()) => true,
            _ = sleep(duration) => false,
        }
    }

    #[instrument(skip(self), fields(subsystem = "jobs", component = "scheduler", worker_id = %self.config.worker_id))]
    async fn run(&self) {
        if !self.config.enabled {
            info!("OCR scheduler is disabled, not starting");
            return;
        }

        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            lease_duration_secs = self.config.lease_duration.as_secs(),
            confidence_threshold = self.config.confidence_threshold,
            provider = self.provider.name(),
            "OCR scheduler started"
        );
        self.emit(SchedulerEvent::WorkerStarted {
            worker_id: self.config.worker_id.clone(),
        });

        loop {
            if self.is_shutting_down() {
                break;
            }

            let result = AssertUnwindSafe(self.tick())
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(Error::Internal("scheduler tick panicked".into())));

            match result {
                Ok(Tick::Idle) => {
                    if self.sleep_or_shutdown(self.config.poll_interval).await {
                        break;
                    }
                }
                Ok(Tick::Cancelled) => break,
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, transient = e.is_transient(), "OCR scheduler iteration failed");
                    self.emit(SchedulerEvent::LoopError {
                        error: e.to_string(),
                    });
                    if self.sleep_or_shutdown(self.config.error_backoff).await {
                        break;
                    }
                }
            }
        }

        self.emit(SchedulerEvent::WorkerStopped {
            worker_id: self.config.worker_id.clone(),
        });
        info!("OCR scheduler stopped");
    }

    /// Perform exactly one loop iteration, without sleeping.
    pub async fn tick(&self) -> Result<Tick> {
        if self.is_shutting_down() {
            return Ok(Tick::Cancelled);
        }

        let now = Utc::now();
        let Some(job_id) = self.store.find_oldest_eligible(now).await? else {
            trace!(subsystem = "jobs", component = "scheduler", "No eligible OCR job");
            return Ok(Tick::Idle);
        };

        let lease = chrono::Duration::from_std(self.config.lease_duration)
            .map_err(|e| Error::Config(format!("invalid lease duration: {e}")))?;
        if !self
            .store
            .try_claim(job_id, &self.config.worker_id, lease, now)
            .await?
        {
            debug!(
                subsystem = "jobs",
                component = "scheduler",
                job_id = %job_id,
                "Lost claim race"
            );
            self.emit(SchedulerEvent::ClaimLost { job_id });
            return Ok(Tick::LostRace(job_id));
        }

        debug!(
            subsystem = "jobs",
            component = "scheduler",
            job_id = %job_id,
            worker_id = %self.config.worker_id,
            "Claimed OCR job"
        );
        self.emit(SchedulerEvent::JobClaimed { job_id });

        self.advance(job_id).await
    }

    /// Input location derived from the job's document, if a locator is set.
    async fn locate_input(&self, job: &OcrJob) -> Result<Option<String>> {
        let Some(inputs) = &self.inputs else {
            return Ok(None);
        };
        let location = inputs.locate(job.document_id).await?;
        Ok(location.filter(|loc| validate_input_location(Some(loc)).is_ok()))
    }

    fn lease_lost(&self, job_id: Uuid) -> Tick {
        warn!(
            subsystem = "jobs",
            component = "scheduler",
            job_id = %job_id,
            worker_id = %self.config.worker_id,
            "Lease lost during provider call, discarding result"
        );
        self.emit(SchedulerEvent::LeaseLost { job_id });
        Tick::LeaseLost(job_id)
    }

    /// Drive a job this instance holds the lease on.
    async fn advance(&self, job_id: Uuid) -> Result<Tick> {
        let start = Instant::now();
        let mut job = self.store.load(job_id).await?;

        let mut action = plan(&job)?;
        if action == Action::FailMissingInput {
            if let Some(location) = self.locate_input(&job).await? {
                debug!(
                    subsystem = "jobs",
                    component = "scheduler",
                    job_id = %job_id,
                    input_location = %location,
                    "Derived OCR input location from document"
                );
                job.input_location = Some(location.clone());
                action = Action::Start {
                    input_location: location,
                };
            }
        }

        let mut poll: Option<PollOutcome> = None;
        let result = match action {
            Action::Start { input_location } => {
                let Some(outcome) = self
                    .unless_shutdown(self.provider.start(&input_location))
                    .await?
                else {
                    return Ok(Tick::Cancelled);
                };
                ProviderResult::Started(outcome)
            }
            Action::Poll { operation_id } => {
                let Some(outcome) = self
                    .unless_shutdown(self.provider.poll(&operation_id))
                    .await?
                else {
                    return Ok(Tick::Cancelled);
                };
                self.emit(SchedulerEvent::JobPolled {
                    job_id,
                    done: outcome.done,
                });
                poll = Some(outcome.clone());
                ProviderResult::Polled(outcome)
            }
            Action::FailMissingInput => ProviderResult::MissingInput,
            Action::FailMissingOperation => ProviderResult::MissingOperation,
        };

        let transition = decide(&job, &result, self.config.confidence_threshold)?;
        if transition.is_noop() {
            debug!(
                subsystem = "jobs",
                component = "scheduler",
                job_id = %job_id,
                "OCR operation still running"
            );
            return Ok(Tick::StillRunning(job_id));
        }
        transition.apply(&mut job);

        let worker_id = self.config.worker_id.as_str();
        if !self.store.holds_lease(job_id, worker_id, Utc::now()).await? {
            return Ok(self.lease_lost(job_id));
        }

        // Document first: a failed save leaves the job reclaimable and the
        // projection is idempotent.
        self.projector
            .project(job.document_id, &transition, poll.as_ref())
            .await?;
        if !self.store.save(&job, worker_id, Utc::now()).await? {
            return Ok(self.lease_lost(job_id));
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        if transition.entered_processing() {
            if let Some(op) = &job.provider_op_id {
                self.emit(SchedulerEvent::JobStarted {
                    job_id,
                    provider_op_id: op.clone(),
                });
            }
        }

        match job.status {
            OcrJobStatus::Succeeded => info!(
                subsystem = "jobs",
                component = "scheduler",
                job_id = %job_id,
                document_id = %job.document_id,
                status = %job.status,
                confidence = poll.as_ref().and_then(|p| p.mean_confidence),
                attempts = job.attempts,
                duration_ms,
                "OCR job succeeded"
            ),
            OcrJobStatus::LowConfidence => warn!(
                subsystem = "jobs",
                component = "scheduler",
                job_id = %job_id,
                document_id = %job.document_id,
                confidence = poll.as_ref().and_then(|p| p.mean_confidence),
                threshold = self.config.confidence_threshold,
                "OCR result below confidence threshold"
            ),
            OcrJobStatus::Failed => warn!(
                subsystem = "jobs",
                component = "scheduler",
                job_id = %job_id,
                document_id = %job.document_id,
                attempts = job.attempts,
                error = job.last_error.as_deref().unwrap_or_default(),
                "OCR job failed"
            ),
            _ => info!(
                subsystem = "jobs",
                component = "scheduler",
                job_id = %job_id,
                provider_op_id = job.provider_op_id.as_deref().unwrap_or_default(),
                attempts = job.attempts,
                duration_ms,
                "OCR job processing"
            ),
        }

        if job.status.is_terminal() {
            self.emit(SchedulerEvent::JobSettled {
                job_id,
                document_id: job.document_id,
                status: job.status,
            });
        }

        Ok(Tick::Advanced {
            job_id,
            status: job.status,
        })
    }
}
