//! Error types for the scheduler core.

use thiserror::Error;
use uuid::Uuid;

use crate::manifest::ManifestError;

/// Result type for scheduler operations.
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Errors surfaced synchronously by the scheduler runtime.
///
/// These cover creation-time validation and configuration problems. Tick-time
/// failures never surface here; they are captured on the affected job's
/// `last_error` instead.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Cron inputs are rejected at the single schedule validation site.
    #[error("Cron schedules are not supported yet")]
    CronSchedule,

    /// A schedule carried an out-of-range value.
    #[error("{0}")]
    InvalidSchedule(String),

    /// The referenced hire does not exist.
    #[error("Hire {0} not found")]
    HireNotFound(Uuid),

    /// The referenced hire is canceled; canceled is terminal.
    #[error("Hire {0} is canceled")]
    HireCanceled(Uuid),

    /// The requested entrypoint is not present in the agent's manifest.
    #[error("Entrypoint {0} not found")]
    EntrypointNotFound(String),

    /// The runtime was constructed without a usable invoker.
    #[error("runtime configuration error: {0}")]
    Config(String),

    /// Manifest fetch or parse failure at create/add time.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// The backing store failed.
    #[error("store error: {0}")]
    Store(anyhow::Error),
}
