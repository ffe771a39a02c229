//! Job model.
//!
//! A job is one scheduled invocation target: which hire, which entrypoint,
//! what input, and when. Workers lease jobs through the store; the runtime
//! moves them through their lifecycle on each tick.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::error::SchedulerError;

/// When a job runs.
///
/// The set of kinds is closed. `Cron` exists only so that inputs carrying it
/// reach the one validation site and are rejected there; a cron schedule is
/// never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Run once at a wall-clock instant.
    Once { at: DateTime<Utc> },
    /// Run repeatedly at a fixed interval; the first run is immediate.
    Interval { every_ms: i64 },
    /// Unsupported; rejected by [`Schedule::validate`].
    Cron { expr: String },
}

impl Schedule {
    /// Reject malformed or unsupported schedules.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        match self {
            Schedule::Once { at } => {
                if at.timestamp_millis() < 0 {
                    return Err(SchedulerError::InvalidSchedule(format!(
                        "once schedule requires a non-negative timestamp, got {at}"
                    )));
                }
                Ok(())
            }
            Schedule::Interval { every_ms } => {
                if *every_ms <= 0 {
                    return Err(SchedulerError::InvalidSchedule(format!(
                        "interval schedule requires a positive every_ms, got {every_ms}"
                    )));
                }
                Ok(())
            }
            Schedule::Cron { .. } => Err(SchedulerError::CronSchedule),
        }
    }

    /// The first instant a worker may claim a job with this schedule.
    pub fn initial_next_run_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Schedule::Once { at } => *at,
            // Interval jobs run immediately; cron never survives validation.
            _ => now,
        }
    }
}

/// Job lifecycle states. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Leased,
    Paused,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Leased => "leased",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(JobStatus::Pending),
            "leased" => Some(JobStatus::Leased),
            "paused" => Some(JobStatus::Paused),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// An expiring claim taken by one worker over one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub worker_id: String,
    pub expires_at: DateTime<Utc>,
}

/// A scheduled invocation of one entrypoint on a hire's agent.
///
/// Invariant: `lease` is present iff `status == Leased`. All transitions that
/// leave `Leased` go through [`Job::clear_lease`].
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
pub struct Job {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,

    pub hire_id: Uuid,

    pub entrypoint_key: String,

    #[builder(default = serde_json::Value::Null)]
    pub input: serde_json::Value,

    pub schedule: Schedule,

    /// Earliest instant at which a worker may claim this job.
    pub next_run_at: DateTime<Utc>,

    /// Consecutive failed attempts since the last success.
    #[builder(default = 0)]
    pub attempts: i32,

    /// Once `attempts > max_retries`, failure is terminal.
    #[builder(default = 3)]
    pub max_retries: i32,

    #[builder(default)]
    pub status: JobStatus,

    #[builder(default)]
    pub lease: Option<Lease>,

    /// Forwarded verbatim to the invoker for duplicate suppression.
    #[builder(default)]
    pub idempotency_key: Option<String>,

    #[builder(default)]
    pub last_error: Option<String>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,

    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Drop the lease when leaving the `Leased` state.
    pub fn clear_lease(&mut self) {
        self.lease = None;
    }

    /// Whether this job is currently leased by the given worker.
    pub fn is_leased_by(&self, worker_id: &str) -> bool {
        self.status == JobStatus::Leased
            && self
                .lease
                .as_ref()
                .is_some_and(|lease| lease.worker_id == worker_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn once_schedule_validates() {
        let at = Utc.timestamp_millis_opt(1_000_000).unwrap();
        assert!(Schedule::Once { at }.validate().is_ok());
    }

    #[test]
    fn negative_once_timestamp_is_rejected() {
        let at = Utc.timestamp_millis_opt(-1).unwrap();
        let err = Schedule::Once { at }.validate().unwrap_err();
        assert!(err.to_string().contains("non-negative"));
    }

    #[test]
    fn interval_requires_positive_every_ms() {
        assert!(Schedule::Interval { every_ms: 60_000 }.validate().is_ok());
        assert!(Schedule::Interval { every_ms: 0 }.validate().is_err());
        assert!(Schedule::Interval { every_ms: -5 }.validate().is_err());
    }

    #[test]
    fn cron_is_rejected_with_exact_message() {
        let err = Schedule::Cron {
            expr: "* * * * *".to_string(),
        }
        .validate()
        .unwrap_err();
        assert_eq!(err.to_string(), "Cron schedules are not supported yet");
    }

    #[test]
    fn initial_next_run_at_for_once_is_the_scheduled_instant() {
        let now = Utc.timestamp_millis_opt(1_000_000).unwrap();
        let at = Utc.timestamp_millis_opt(2_000_000).unwrap();
        assert_eq!(Schedule::Once { at }.initial_next_run_at(now), at);
    }

    #[test]
    fn initial_next_run_at_for_interval_is_now() {
        let now = Utc.timestamp_millis_opt(1_000_000).unwrap();
        let schedule = Schedule::Interval { every_ms: 60_000 };
        assert_eq!(schedule.initial_next_run_at(now), now);
    }

    #[test]
    fn schedule_serde_round_trip() {
        let schedule = Schedule::Interval { every_ms: 15_000 };
        let value = serde_json::to_value(&schedule).unwrap();
        assert_eq!(value["kind"], "interval");
        assert_eq!(value["every_ms"], 15_000);

        let back: Schedule = serde_json::from_value(value).unwrap();
        assert_eq!(back, schedule);
    }

    #[test]
    fn lease_ownership_check() {
        let now = Utc::now();
        let mut job = Job::builder()
            .hire_id(Uuid::new_v4())
            .entrypoint_key("run".to_string())
            .schedule(Schedule::Interval { every_ms: 1_000 })
            .next_run_at(now)
            .build();

        assert!(!job.is_leased_by("worker-a"));

        job.status = JobStatus::Leased;
        job.lease = Some(Lease {
            worker_id: "worker-a".to_string(),
            expires_at: now + chrono::Duration::milliseconds(30_000),
        });

        assert!(job.is_leased_by("worker-a"));
        assert!(!job.is_leased_by("worker-b"));

        job.clear_lease();
        job.status = JobStatus::Pending;
        assert!(!job.is_leased_by("worker-a"));
    }

    #[test]
    fn terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Leased.is_terminal());
        assert!(!JobStatus::Paused.is_terminal());
    }
}
