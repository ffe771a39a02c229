//! Scheduler runtime.
//!
//! A single facade over the store: hires and jobs are created here, workers
//! drive [`SchedulerRuntime::tick`] and
//! [`SchedulerRuntime::recover_expired_leases`], and control operations flip
//! hire/job state. The runtime keeps no mutable state of its own; everything
//! lives in the store, which makes any number of runtimes over one store
//! equivalent.
//!
//! # Per-job sequence on tick
//!
//! ```text
//! claim_job ── lost ──► skip (another worker owns it)
//!     │
//!     ├─► hire missing/canceled ──► Failed
//!     ├─► hire paused ──► Pending, deferred one lease window
//!     ├─► stale card ──► refresh (transport errors retry via backoff)
//!     ├─► entrypoint gone ──► Failed
//!     └─► invoke
//!             ├─ ok: Once ──► Completed / Interval ──► Pending at now+every
//!             └─ err: attempts+1 ──► backoff retry or terminal Failed
//! ```
//!
//! Post-claim writes are guarded by lease ownership: a job that left `Leased`
//! mid-flight (pause, cancel interference) has its outcome discarded, which
//! is why invokers should honor the forwarded idempotency key.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::backoff::retry_backoff_ms;
use crate::clock::{Clock, SystemClock};
use crate::error::{Result, SchedulerError};
use crate::hire::{AgentBinding, Hire, HireStatus, WalletRef};
use crate::invoker::{InvocationArgs, Invoker, InvokerAdapter, WalletResolver};
use crate::job::{Job, JobStatus, Lease, Schedule};
use crate::manifest::{HttpManifestFetcher, ManifestError, ManifestFetcher};
use crate::store::Store;

pub const DEFAULT_LEASE_MS: i64 = 30_000;
pub const DEFAULT_MAX_RETRIES: i32 = 3;
pub const DEFAULT_MAX_DUE_BATCH: i64 = 25;
pub const DEFAULT_MANIFEST_TTL_MS: i64 = 300_000;
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Runtime construction options.
///
/// Either `invoker` or `adapter` must be supplied; construction fails with a
/// configuration error when both are absent.
#[derive(TypedBuilder)]
pub struct RuntimeConfig {
    pub store: Arc<dyn Store>,

    #[builder(default, setter(strip_option))]
    pub clock: Option<Arc<dyn Clock>>,

    #[builder(default, setter(strip_option))]
    pub manifest_fetcher: Option<Arc<dyn ManifestFetcher>>,

    #[builder(default, setter(strip_option))]
    pub invoker: Option<Arc<dyn Invoker>>,

    #[builder(default, setter(strip_option))]
    pub adapter: Option<Arc<dyn InvokerAdapter>>,

    #[builder(default, setter(strip_option))]
    pub wallet_resolver: Option<Arc<dyn WalletResolver>>,

    #[builder(default = DEFAULT_LEASE_MS)]
    pub lease_ms: i64,

    #[builder(default = DEFAULT_MAX_RETRIES)]
    pub default_max_retries: i32,

    #[builder(default = DEFAULT_MAX_DUE_BATCH)]
    pub max_due_batch: i64,

    #[builder(default = DEFAULT_MANIFEST_TTL_MS)]
    pub manifest_ttl_ms: i64,

    #[builder(default = DEFAULT_CONCURRENCY)]
    pub default_concurrency: usize,
}

/// Request to hire an agent and register its first job.
#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct CreateHire {
    pub manifest_url: String,
    pub entrypoint_key: String,
    pub schedule: Schedule,

    #[builder(default = serde_json::Value::Null)]
    pub job_input: serde_json::Value,

    #[builder(default)]
    pub wallet: Option<WalletRef>,

    #[builder(default)]
    pub max_retries: Option<i32>,

    #[builder(default)]
    pub idempotency_key: Option<String>,

    #[builder(default)]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

/// Request to register another job on an existing hire.
#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct AddJob {
    pub hire_id: Uuid,
    pub entrypoint_key: String,
    pub schedule: Schedule,

    #[builder(default = serde_json::Value::Null)]
    pub job_input: serde_json::Value,

    #[builder(default)]
    pub max_retries: Option<i32>,

    #[builder(default)]
    pub idempotency_key: Option<String>,
}

/// Result of a guarded control transition.
///
/// Misuse (wrong state, unknown id) is a rejection with a caller-facing
/// message, not an error; the outer `Err` is reserved for store failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlOutcome {
    Applied,
    Rejected(String),
}

impl ControlOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ControlOutcome::Applied)
    }

    pub fn rejection(&self) -> Option<&str> {
        match self {
            ControlOutcome::Applied => None,
            ControlOutcome::Rejected(message) => Some(message),
        }
    }
}

/// Per-tick options; everything falls back to runtime defaults.
#[derive(Debug, Clone, Default)]
pub struct TickOptions {
    pub worker_id: Option<String>,
    pub concurrency: Option<usize>,
}

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Jobs the due query returned.
    pub due: usize,
    /// Jobs this worker won the claim for.
    pub claimed: usize,
    /// Invocations that succeeded (completed or rescheduled).
    pub succeeded: usize,
    /// Failures that were rescheduled with backoff.
    pub retried: usize,
    /// Terminal failures.
    pub failed: usize,
    /// Jobs pushed back a lease window because their hire is paused.
    pub deferred: usize,
    /// Outcomes dropped because the lease was lost mid-flight.
    pub discarded: usize,
}

enum JobOutcome {
    /// Claim lost or claim errored; nothing was changed by this worker.
    Skipped,
    Succeeded,
    Retried,
    Failed,
    Deferred,
    Discarded,
}

enum WriteOutcome {
    Written,
    /// The job left `Leased` mid-flight; the update was dropped.
    OwnershipLost,
    StoreError,
}

/// The scheduler facade. See the module docs for the tick sequence.
pub struct SchedulerRuntime {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    manifest_fetcher: Arc<dyn ManifestFetcher>,
    invoker: Arc<dyn Invoker>,
    wallet_resolver: Option<Arc<dyn WalletResolver>>,
    lease_ms: i64,
    default_max_retries: i32,
    max_due_batch: i64,
    manifest_ttl_ms: i64,
    default_concurrency: usize,
}

impl std::fmt::Debug for SchedulerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerRuntime").finish_non_exhaustive()
    }
}

impl SchedulerRuntime {
    /// Build a runtime, resolving the invoker at construction time.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let invoker = config
            .invoker
            .or_else(|| config.adapter.map(|adapter| adapter.invoker()))
            .ok_or_else(|| {
                SchedulerError::Config("an invoker or adapter is required".to_string())
            })?;

        Ok(Self {
            store: config.store,
            clock: config.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            manifest_fetcher: config
                .manifest_fetcher
                .unwrap_or_else(|| Arc::new(HttpManifestFetcher::new())),
            invoker,
            wallet_resolver: config.wallet_resolver,
            lease_ms: config.lease_ms,
            default_max_retries: config.default_max_retries,
            max_due_batch: config.max_due_batch,
            manifest_ttl_ms: config.manifest_ttl_ms,
            default_concurrency: config.default_concurrency,
        })
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Hire an agent and register its first job.
    ///
    /// The manifest is fetched eagerly so a bad URL or missing entrypoint
    /// fails here rather than at tick time. If the job write fails after the
    /// hire was written, the hire is deleted and the error surfaced.
    pub async fn create_hire(&self, request: CreateHire) -> Result<(Hire, Job)> {
        request.schedule.validate()?;

        let card = self.manifest_fetcher.fetch(&request.manifest_url).await?;
        if !card.has_entrypoint(&request.entrypoint_key) {
            return Err(SchedulerError::EntrypointNotFound(request.entrypoint_key));
        }

        let now = self.clock.now();
        let hire = Hire::builder()
            .agent(AgentBinding {
                manifest_url: request.manifest_url,
                card: Some(card),
                cached_at: Some(now),
            })
            .wallet(request.wallet)
            .metadata(request.metadata)
            .created_at(now)
            .updated_at(now)
            .build();

        let job = Job::builder()
            .hire_id(hire.id)
            .entrypoint_key(request.entrypoint_key)
            .input(request.job_input)
            .schedule(request.schedule.clone())
            .next_run_at(request.schedule.initial_next_run_at(now))
            .max_retries(request.max_retries.unwrap_or(self.default_max_retries))
            .idempotency_key(request.idempotency_key)
            .created_at(now)
            .updated_at(now)
            .build();

        self.store
            .put_hire(hire.clone())
            .await
            .map_err(SchedulerError::Store)?;

        if let Err(err) = self.store.put_job(job.clone()).await {
            if let Err(cleanup_err) = self.store.delete_hire(hire.id).await {
                warn!(
                    hire_id = %hire.id,
                    error = %cleanup_err,
                    "failed to roll back hire after job write failure"
                );
            }
            return Err(SchedulerError::Store(err));
        }

        info!(hire_id = %hire.id, job_id = %job.id, "hire created");
        Ok((hire, job))
    }

    /// Register another job on an existing hire.
    pub async fn add_job(&self, request: AddJob) -> Result<Job> {
        let hire = self
            .store
            .get_hire(request.hire_id)
            .await
            .map_err(SchedulerError::Store)?
            .ok_or(SchedulerError::HireNotFound(request.hire_id))?;

        if hire.is_canceled() {
            return Err(SchedulerError::HireCanceled(request.hire_id));
        }

        let hire = self.refresh_card_if_stale(hire).await?;
        let card = match hire.agent.card.as_ref() {
            Some(card) => card,
            None => return Err(SchedulerError::EntrypointNotFound(request.entrypoint_key)),
        };
        if !card.has_entrypoint(&request.entrypoint_key) {
            return Err(SchedulerError::EntrypointNotFound(request.entrypoint_key));
        }

        request.schedule.validate()?;

        let now = self.clock.now();
        let job = Job::builder()
            .hire_id(hire.id)
            .entrypoint_key(request.entrypoint_key)
            .input(request.job_input)
            .schedule(request.schedule.clone())
            .next_run_at(request.schedule.initial_next_run_at(now))
            .max_retries(request.max_retries.unwrap_or(self.default_max_retries))
            .idempotency_key(request.idempotency_key)
            .created_at(now)
            .updated_at(now)
            .build();

        self.store
            .put_job(job.clone())
            .await
            .map_err(SchedulerError::Store)?;

        info!(hire_id = %hire.id, job_id = %job.id, "job added");
        Ok(job)
    }

    // ------------------------------------------------------------------
    // Control operations
    // ------------------------------------------------------------------

    pub async fn pause_hire(&self, hire_id: Uuid) -> Result<ControlOutcome> {
        let mut hire = match self.load_hire(hire_id).await? {
            Some(hire) => hire,
            None => {
                return Ok(ControlOutcome::Rejected(format!("Hire {hire_id} not found")));
            }
        };

        match hire.status {
            HireStatus::Canceled => Ok(ControlOutcome::Rejected(format!(
                "Hire {hire_id} is canceled and cannot be paused"
            ))),
            HireStatus::Paused => Ok(ControlOutcome::Rejected(format!(
                "Hire {hire_id} is already paused"
            ))),
            HireStatus::Active => {
                hire.status = HireStatus::Paused;
                hire.updated_at = self.clock.now();
                self.store
                    .put_hire(hire)
                    .await
                    .map_err(SchedulerError::Store)?;
                info!(hire_id = %hire_id, "hire paused");
                Ok(ControlOutcome::Applied)
            }
        }
    }

    pub async fn resume_hire(&self, hire_id: Uuid) -> Result<ControlOutcome> {
        let mut hire = match self.load_hire(hire_id).await? {
            Some(hire) => hire,
            None => {
                return Ok(ControlOutcome::Rejected(format!("Hire {hire_id} not found")));
            }
        };

        match hire.status {
            HireStatus::Canceled => Ok(ControlOutcome::Rejected(format!(
                "Hire {hire_id} is canceled and cannot be resumed"
            ))),
            HireStatus::Active => Ok(ControlOutcome::Rejected(format!(
                "Hire {hire_id} is already active"
            ))),
            HireStatus::Paused => {
                hire.status = HireStatus::Active;
                hire.updated_at = self.clock.now();
                self.store
                    .put_hire(hire)
                    .await
                    .map_err(SchedulerError::Store)?;
                info!(hire_id = %hire_id, "hire resumed");
                Ok(ControlOutcome::Applied)
            }
        }
    }

    pub async fn cancel_hire(&self, hire_id: Uuid) -> Result<ControlOutcome> {
        let mut hire = match self.load_hire(hire_id).await? {
            Some(hire) => hire,
            None => {
                return Ok(ControlOutcome::Rejected(format!("Hire {hire_id} not found")));
            }
        };

        if hire.is_canceled() {
            return Ok(ControlOutcome::Rejected(format!(
                "Hire {hire_id} is already canceled"
            )));
        }

        hire.status = HireStatus::Canceled;
        hire.updated_at = self.clock.now();
        self.store
            .put_hire(hire)
            .await
            .map_err(SchedulerError::Store)?;
        info!(hire_id = %hire_id, "hire canceled");
        Ok(ControlOutcome::Applied)
    }

    /// Pause a pending or leased job.
    ///
    /// Pausing a leased job clears the lease. An invoker already in flight
    /// for that lease may still return; its outcome is discarded because the
    /// job is no longer `Leased` when the post-invoke write is attempted.
    pub async fn pause_job(&self, job_id: Uuid) -> Result<ControlOutcome> {
        let mut job = match self.load_job(job_id).await? {
            Some(job) => job,
            None => {
                return Ok(ControlOutcome::Rejected(format!("Job {job_id} not found")));
            }
        };

        match job.status {
            JobStatus::Completed => Ok(ControlOutcome::Rejected(format!(
                "Job {job_id} is completed and cannot be paused"
            ))),
            JobStatus::Failed => Ok(ControlOutcome::Rejected(format!(
                "Job {job_id} is failed and cannot be paused"
            ))),
            JobStatus::Paused => Ok(ControlOutcome::Rejected(format!(
                "Job {job_id} is already paused"
            ))),
            JobStatus::Pending | JobStatus::Leased => {
                job.clear_lease();
                job.status = JobStatus::Paused;
                job.updated_at = self.clock.now();
                self.store
                    .put_job(job)
                    .await
                    .map_err(SchedulerError::Store)?;
                info!(job_id = %job_id, "job paused");
                Ok(ControlOutcome::Applied)
            }
        }
    }

    /// Resume a paused job, optionally overriding when it next runs.
    pub async fn resume_job(
        &self,
        job_id: Uuid,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<ControlOutcome> {
        let mut job = match self.load_job(job_id).await? {
            Some(job) => job,
            None => {
                return Ok(ControlOutcome::Rejected(format!("Job {job_id} not found")));
            }
        };

        match job.status {
            JobStatus::Completed => Ok(ControlOutcome::Rejected(format!(
                "Job {job_id} is completed and cannot be resumed"
            ))),
            JobStatus::Failed => Ok(ControlOutcome::Rejected(format!(
                "Job {job_id} is failed and cannot be resumed"
            ))),
            JobStatus::Pending | JobStatus::Leased => Ok(ControlOutcome::Rejected(format!(
                "Job {job_id} is not paused"
            ))),
            JobStatus::Paused => {
                let now = self.clock.now();
                job.status = JobStatus::Pending;
                job.next_run_at = next_run_at.unwrap_or(now);
                job.updated_at = now;
                self.store
                    .put_job(job)
                    .await
                    .map_err(SchedulerError::Store)?;
                info!(job_id = %job_id, "job resumed");
                Ok(ControlOutcome::Applied)
            }
        }
    }

    // ------------------------------------------------------------------
    // Tick and recovery
    // ------------------------------------------------------------------

    /// One sweep of due-job processing.
    ///
    /// The due batch is processed in groups of `concurrency`; within a group
    /// jobs run concurrently, each independently claimed through the store.
    /// Per-job failures never abort the sweep.
    pub async fn tick(&self, options: TickOptions) -> Result<TickSummary> {
        let worker_id = options
            .worker_id
            .unwrap_or_else(|| format!("worker-{}", Uuid::new_v4()));
        let concurrency = options
            .concurrency
            .unwrap_or(self.default_concurrency)
            .max(1);

        let now = self.clock.now();
        let due = self
            .store
            .get_due_jobs(now, self.max_due_batch)
            .await
            .map_err(SchedulerError::Store)?;

        let mut summary = TickSummary {
            due: due.len(),
            ..TickSummary::default()
        };

        for group in due.chunks(concurrency) {
            let outcomes = futures::future::join_all(
                group
                    .iter()
                    .cloned()
                    .map(|job| self.process_due_job(job, &worker_id, now)),
            )
            .await;

            for outcome in outcomes {
                summary.absorb(outcome);
            }
        }

        if summary.due > 0 {
            info!(
                worker_id = %worker_id,
                due = summary.due,
                claimed = summary.claimed,
                succeeded = summary.succeeded,
                retried = summary.retried,
                failed = summary.failed,
                deferred = summary.deferred,
                discarded = summary.discarded,
                "tick complete"
            );
        } else {
            debug!(worker_id = %worker_id, "tick complete, nothing due");
        }

        Ok(summary)
    }

    /// Return every job whose lease expired to `Pending`, due immediately.
    ///
    /// Attempts are left untouched; a crashed worker's attempt does not count
    /// against the retry budget. Safe to run from any number of workers.
    pub async fn recover_expired_leases(&self) -> Result<usize> {
        let now = self.clock.now();
        let expired = self
            .store
            .get_expired_leases(now)
            .await
            .map_err(SchedulerError::Store)?;

        let mut recovered = 0;
        for mut job in expired {
            let job_id = job.id;
            job.clear_lease();
            job.status = JobStatus::Pending;
            job.next_run_at = now;
            job.updated_at = now;

            match self.store.put_job(job).await {
                Ok(()) => {
                    recovered += 1;
                    info!(job_id = %job_id, "recovered expired lease");
                }
                Err(err) => {
                    warn!(job_id = %job_id, error = %err, "failed to recover expired lease");
                }
            }
        }

        Ok(recovered)
    }

    // ------------------------------------------------------------------
    // Per-job processing
    // ------------------------------------------------------------------

    async fn process_due_job(&self, mut job: Job, worker_id: &str, now: DateTime<Utc>) -> JobOutcome {
        let job_id = job.id;

        match self
            .store
            .claim_job(job_id, worker_id, self.lease_ms, now)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(job_id = %job_id, "claim lost to another worker");
                return JobOutcome::Skipped;
            }
            Err(err) => {
                // Nothing was claimed; the next tick will retry this job.
                warn!(job_id = %job_id, error = %err, "claim failed");
                return JobOutcome::Skipped;
            }
        }

        // Mirror the transition the store just persisted so later writes
        // start from the leased row.
        job.status = JobStatus::Leased;
        job.lease = Some(Lease {
            worker_id: worker_id.to_string(),
            expires_at: now + Duration::milliseconds(self.lease_ms),
        });

        let hire = match self.store.get_hire(job.hire_id).await {
            Ok(Some(hire)) => hire,
            Ok(None) => {
                return self.finalize_failed(job, worker_id, "hire missing").await;
            }
            Err(err) => {
                return self
                    .record_failure(job, worker_id, &format!("store error: {err}"))
                    .await;
            }
        };

        match hire.status {
            HireStatus::Canceled => {
                return self.finalize_failed(job, worker_id, "hire canceled").await;
            }
            HireStatus::Paused => {
                // Defer by one lease window; attempts are preserved.
                job.clear_lease();
                job.status = JobStatus::Pending;
                job.next_run_at = now + Duration::milliseconds(self.lease_ms);
                job.updated_at = now;
                let outcome = self.write_leased_update(job, worker_id).await;
                info!(job_id = %job_id, "hire paused, deferring job");
                return match outcome {
                    WriteOutcome::Written => JobOutcome::Deferred,
                    _ => JobOutcome::Discarded,
                };
            }
            HireStatus::Active => {}
        }

        let hire = match self.refresh_card_if_stale(hire).await {
            Ok(hire) => hire,
            Err(err) => {
                // Transport-level refresh failures are transient; only a
                // successful fetch that lacks the entrypoint is terminal.
                return self
                    .record_failure(job, worker_id, &format!("manifest refresh failed: {err}"))
                    .await;
            }
        };

        let card = match hire.agent.card.clone() {
            Some(card) => card,
            None => {
                return self
                    .record_failure(job, worker_id, "agent card unavailable")
                    .await;
            }
        };

        if !card.has_entrypoint(&job.entrypoint_key) {
            let message = format!("Entrypoint {} not found", job.entrypoint_key);
            return self.finalize_failed(job, worker_id, &message).await;
        }

        let mut wallet_handle = None;
        if let (Some(resolver), Some(wallet)) =
            (self.wallet_resolver.as_ref(), hire.wallet.as_ref())
        {
            match resolver.resolve(wallet).await {
                Ok(handle) => wallet_handle = Some(handle),
                Err(err) => {
                    return self
                        .record_failure(job, worker_id, &format!("wallet resolution failed: {err}"))
                        .await;
                }
            }
        }

        let args = InvocationArgs {
            manifest: card,
            entrypoint_key: job.entrypoint_key.clone(),
            input: job.input.clone(),
            job_id,
            idempotency_key: job.idempotency_key.clone(),
            wallet_ref: hire.wallet.clone(),
            wallet_handle,
        };

        // No store lock is held here; the lease alone guards the job.
        match self.invoker.invoke(args).await {
            Ok(_) => self.finalize_success(job, worker_id).await,
            Err(err) => self.record_failure(job, worker_id, &err.to_string()).await,
        }
    }

    async fn finalize_success(&self, mut job: Job, worker_id: &str) -> JobOutcome {
        let now = self.clock.now();
        let job_id = job.id;

        job.clear_lease();
        job.attempts = 0;
        job.last_error = None;
        job.updated_at = now;

        match job.schedule {
            Schedule::Interval { every_ms } => {
                job.status = JobStatus::Pending;
                job.next_run_at = now + Duration::milliseconds(every_ms);
            }
            // Once jobs stay completed; cron never survives validation.
            _ => {
                job.status = JobStatus::Completed;
            }
        }

        match self.write_leased_update(job, worker_id).await {
            WriteOutcome::Written => {
                debug!(job_id = %job_id, "job succeeded");
                JobOutcome::Succeeded
            }
            _ => JobOutcome::Discarded,
        }
    }

    async fn record_failure(&self, mut job: Job, worker_id: &str, message: &str) -> JobOutcome {
        let now = self.clock.now();
        let job_id = job.id;

        job.clear_lease();
        job.attempts += 1;
        job.last_error = Some(message.to_string());
        job.updated_at = now;

        if job.attempts > job.max_retries {
            job.status = JobStatus::Failed;
            let attempts = job.attempts;
            let outcome = self.write_leased_update(job, worker_id).await;
            warn!(job_id = %job_id, attempts, error = %message, "job failed, retries exhausted");
            return match outcome {
                WriteOutcome::Written => JobOutcome::Failed,
                _ => JobOutcome::Discarded,
            };
        }

        job.status = JobStatus::Pending;
        job.next_run_at = now + Duration::milliseconds(retry_backoff_ms(job.attempts));
        let attempts = job.attempts;
        let next_run_at = job.next_run_at;
        let outcome = self.write_leased_update(job, worker_id).await;
        info!(
            job_id = %job_id,
            attempts,
            next_run_at = %next_run_at,
            error = %message,
            "job scheduled for retry"
        );
        match outcome {
            WriteOutcome::Written => JobOutcome::Retried,
            _ => JobOutcome::Discarded,
        }
    }

    /// Terminal failure independent of the retry budget (missing or canceled
    /// hire, entrypoint gone from a freshly fetched card).
    async fn finalize_failed(&self, mut job: Job, worker_id: &str, message: &str) -> JobOutcome {
        let now = self.clock.now();
        let job_id = job.id;

        job.clear_lease();
        job.status = JobStatus::Failed;
        job.last_error = Some(message.to_string());
        job.updated_at = now;

        let outcome = self.write_leased_update(job, worker_id).await;
        warn!(job_id = %job_id, error = %message, "job failed");
        match outcome {
            WriteOutcome::Written => JobOutcome::Failed,
            _ => JobOutcome::Discarded,
        }
    }

    /// Write a post-claim update, but only while this worker still owns the
    /// lease. Control operations may have moved the job out of `Leased` while
    /// the invoker was in flight; in that case the update is dropped.
    async fn write_leased_update(&self, updated: Job, worker_id: &str) -> WriteOutcome {
        let job_id = updated.id;

        match self.store.get_job(job_id).await {
            Ok(Some(current)) if current.is_leased_by(worker_id) => {
                match self.store.put_job(updated).await {
                    Ok(()) => WriteOutcome::Written,
                    Err(err) => {
                        // The job stays leased; lease expiry will recover it.
                        error!(job_id = %job_id, error = %err, "failed to persist job outcome");
                        WriteOutcome::StoreError
                    }
                }
            }
            Ok(_) => {
                info!(job_id = %job_id, "job left leased state mid-flight, discarding outcome");
                WriteOutcome::OwnershipLost
            }
            Err(err) => {
                error!(job_id = %job_id, error = %err, "failed to re-read job before outcome write");
                WriteOutcome::StoreError
            }
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn load_hire(&self, hire_id: Uuid) -> Result<Option<Hire>> {
        self.store
            .get_hire(hire_id)
            .await
            .map_err(SchedulerError::Store)
    }

    async fn load_job(&self, job_id: Uuid) -> Result<Option<Job>> {
        self.store
            .get_job(job_id)
            .await
            .map_err(SchedulerError::Store)
    }

    /// Refresh the hire's cached card when the TTL has lapsed.
    ///
    /// The refreshed card is written back onto the hire; concurrent refreshes
    /// race benignly (last writer wins with equivalent content), so a failed
    /// write is logged and the freshly fetched card still used.
    async fn refresh_card_if_stale(
        &self,
        mut hire: Hire,
    ) -> std::result::Result<Hire, ManifestError> {
        let now = self.clock.now();
        if hire.card_is_fresh(now, self.manifest_ttl_ms) {
            return Ok(hire);
        }

        let card = self.manifest_fetcher.fetch(&hire.agent.manifest_url).await?;
        hire.set_card(card, now);

        if let Err(err) = self.store.put_hire(hire.clone()).await {
            warn!(hire_id = %hire.id, error = %err, "failed to persist refreshed agent card");
        } else {
            debug!(hire_id = %hire.id, "agent card refreshed");
        }

        Ok(hire)
    }
}

impl TickSummary {
    fn absorb(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Skipped => return,
            JobOutcome::Succeeded => self.succeeded += 1,
            JobOutcome::Retried => self.retried += 1,
            JobOutcome::Failed => self.failed += 1,
            JobOutcome::Deferred => self.deferred += 1,
            JobOutcome::Discarded => self.discarded += 1,
        }
        self.claimed += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;

    #[test]
    fn construction_requires_an_invoker() {
        let config = RuntimeConfig::builder()
            .store(Arc::new(InMemoryStore::new()) as Arc<dyn Store>)
            .build();

        let err = SchedulerRuntime::new(config).unwrap_err();
        assert!(matches!(err, SchedulerError::Config(_)));
    }

    #[test]
    fn control_outcome_helpers() {
        assert!(ControlOutcome::Applied.is_applied());
        assert_eq!(ControlOutcome::Applied.rejection(), None);

        let rejected = ControlOutcome::Rejected("nope".to_string());
        assert!(!rejected.is_applied());
        assert_eq!(rejected.rejection(), Some("nope"));
    }
}
