//! Injectable wall clock.
//!
//! The runtime never calls `Utc::now()` directly; all timestamps flow through
//! a [`Clock`] so tests can pin time to a fixed instant and advance it
//! manually.

use chrono::{DateTime, Utc};

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
