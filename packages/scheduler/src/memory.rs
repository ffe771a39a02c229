//! In-memory store.
//!
//! Backs tests and single-process deployments. All operations serialize
//! through one `RwLock`; `claim_job` runs its check-and-transition entirely
//! under the write lock, which is what makes it atomic here.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::hire::Hire;
use crate::job::{Job, JobStatus, Lease};
use crate::store::Store;

#[derive(Default)]
struct MemoryState {
    hires: HashMap<Uuid, Hire>,
    jobs: HashMap<Uuid, Job>,
}

/// Map-backed [`Store`] serialized by a per-store lock.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every job, for inspection in tests.
    pub fn jobs(&self) -> Vec<Job> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .jobs
            .values()
            .cloned()
            .collect()
    }

    /// Snapshot of every hire, for inspection in tests.
    pub fn hires(&self) -> Vec<Hire> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .hires
            .values()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn put_hire(&self, hire: Hire) -> Result<()> {
        self.state
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .hires
            .insert(hire.id, hire);
        Ok(())
    }

    async fn get_hire(&self, id: Uuid) -> Result<Option<Hire>> {
        Ok(self
            .state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .hires
            .get(&id)
            .cloned())
    }

    async fn delete_hire(&self, id: Uuid) -> Result<()> {
        self.state
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .hires
            .remove(&id);
        Ok(())
    }

    async fn put_job(&self, job: Job) -> Result<()> {
        self.state
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .jobs
            .insert(job.id, job);
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self
            .state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .jobs
            .get(&id)
            .cloned())
    }

    async fn get_due_jobs(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Job>> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());

        let mut due: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Pending && job.next_run_at <= now)
            .cloned()
            .collect();

        due.sort_by(|a, b| {
            a.next_run_at
                .cmp(&b.next_run_at)
                .then(a.created_at.cmp(&b.created_at))
        });
        due.truncate(limit.max(0) as usize);

        Ok(due)
    }

    async fn claim_job(
        &self,
        job_id: Uuid,
        worker_id: &str,
        lease_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());

        let job = match state.jobs.get_mut(&job_id) {
            Some(job) => job,
            None => return Ok(false),
        };

        if job.status != JobStatus::Pending || job.next_run_at > now {
            return Ok(false);
        }

        job.status = JobStatus::Leased;
        job.lease = Some(Lease {
            worker_id: worker_id.to_string(),
            expires_at: now + Duration::milliseconds(lease_ms),
        });
        job.updated_at = now;

        Ok(true)
    }

    async fn get_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<Job>> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());

        Ok(state
            .jobs
            .values()
            .filter(|job| {
                job.status == JobStatus::Leased
                    && job
                        .lease
                        .as_ref()
                        .is_some_and(|lease| lease.expires_at <= now)
            })
            .cloned()
            .collect())
    }
}
