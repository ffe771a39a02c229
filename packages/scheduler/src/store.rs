//! Store contract.
//!
//! The store is the only concurrency boundary in the scheduler. Everything
//! the runtime knows lives behind this trait; correctness under concurrent
//! workers rests entirely on `claim_job` being atomic.
//!
//! # Implementer Notes
//!
//! - `claim_job` MUST be a conditional transition: it succeeds only while the
//!   job is `Pending` with `next_run_at <= now`, and on failure leaves the
//!   store unchanged. Transactional backends do this as a single conditional
//!   `UPDATE`; in-process backends serialize through a per-store lock.
//! - `get_due_jobs` orders oldest-due first and respects the limit; the
//!   runtime uses it only as a candidate list, claiming each job separately.
//! - Operations may fail transiently. The runtime treats a failure before a
//!   successful claim as "skip this job for now" and a failure after a claim
//!   like an invoker failure.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::hire::Hire;
use crate::job::Job;

/// Persistence plus the atomic primitives that make multi-worker execution
/// safe.
#[async_trait]
pub trait Store: Send + Sync {
    /// Upsert a hire.
    async fn put_hire(&self, hire: Hire) -> Result<()>;

    /// Fetch a hire by id.
    async fn get_hire(&self, id: Uuid) -> Result<Option<Hire>>;

    /// Remove a hire.
    ///
    /// Only used as compensation when the job write inside hire creation
    /// fails.
    async fn delete_hire(&self, id: Uuid) -> Result<()>;

    /// Upsert a job.
    async fn put_job(&self, job: Job) -> Result<()>;

    /// Fetch a job by id.
    async fn get_job(&self, id: Uuid) -> Result<Option<Job>>;

    /// Jobs with `status = Pending` and `next_run_at <= now`, oldest-due
    /// first, at most `limit`.
    async fn get_due_jobs(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Job>>;

    /// Atomically lease a due pending job for one worker.
    ///
    /// Returns `true` and persists `status = Leased` with
    /// `lease = { worker_id, now + lease_ms }` iff the job is currently
    /// `Pending` and due at `now`. Returns `false` (store unchanged) when the
    /// job is missing, already claimed, or not yet due.
    async fn claim_job(
        &self,
        job_id: Uuid,
        worker_id: &str,
        lease_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// All jobs with `status = Leased` and `lease.expires_at <= now`.
    async fn get_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<Job>>;
}
