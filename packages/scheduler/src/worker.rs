//! Worker loop.
//!
//! A worker drives one runtime on a fixed period: each sweep runs one tick
//! and then recovers expired leases. Any number of workers with distinct ids
//! may share a store; the store's atomic claim keeps them from stepping on
//! each other.
//!
//! Shutdown is cooperative: cancelling the token stops new sweeps, and an
//! in-flight sweep always runs to completion before the loop exits.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::runtime::{SchedulerRuntime, TickOptions};

/// Configuration for one worker instance.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to sweep.
    pub period: Duration,
    /// Identifier used for leases taken by this worker.
    pub worker_id: String,
    /// Per-tick concurrency override; `None` uses the runtime default.
    pub concurrency: Option<usize>,
}

impl WorkerConfig {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            worker_id: format!("worker-{}", Uuid::new_v4()),
            concurrency: None,
        }
    }

    pub fn with_worker_id(period: Duration, worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..Self::new(period)
        }
    }
}

/// Periodic driver for a [`SchedulerRuntime`].
pub struct Worker {
    runtime: Arc<SchedulerRuntime>,
    config: WorkerConfig,
}

impl Worker {
    /// Create a worker sweeping at the given period.
    pub fn new(runtime: Arc<SchedulerRuntime>, period: Duration) -> Self {
        Self {
            runtime,
            config: WorkerConfig::new(period),
        }
    }

    pub fn with_config(runtime: Arc<SchedulerRuntime>, config: WorkerConfig) -> Self {
        Self { runtime, config }
    }

    /// Spawn the loop and return a handle for cooperative shutdown.
    pub fn start(self) -> WorkerHandle {
        let token = CancellationToken::new();
        let join = tokio::spawn(self.run(token.clone()));
        WorkerHandle { token, join }
    }

    /// Run the loop on the current task until the token is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            worker_id = %self.config.worker_id,
            period_ms = self.config.period.as_millis() as u64,
            "worker starting"
        );

        let mut ticker = tokio::time::interval(self.config.period);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    // Cancellation is only observed between sweeps, so an
                    // in-flight sweep always finishes.
                    self.sweep().await;
                }
            }
        }

        info!(worker_id = %self.config.worker_id, "worker stopped");
    }

    async fn sweep(&self) {
        let options = TickOptions {
            worker_id: Some(self.config.worker_id.clone()),
            concurrency: self.config.concurrency,
        };

        match self.runtime.tick(options).await {
            Ok(summary) => {
                debug!(
                    worker_id = %self.config.worker_id,
                    due = summary.due,
                    claimed = summary.claimed,
                    "sweep finished"
                );
            }
            Err(err) => {
                // The next sweep retries; a failed due-query changes nothing.
                error!(worker_id = %self.config.worker_id, error = %err, "tick failed");
            }
        }

        match self.runtime.recover_expired_leases().await {
            Ok(0) => {}
            Ok(count) => {
                info!(worker_id = %self.config.worker_id, count, "recovered expired leases");
            }
            Err(err) => {
                error!(worker_id = %self.config.worker_id, error = %err, "lease recovery failed");
            }
        }
    }
}

/// Handle to a spawned worker.
pub struct WorkerHandle {
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Token that stops the loop when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Stop issuing new sweeps and wait for the in-flight one to finish.
    pub async fn stop(self) {
        self.token.cancel();
        let _ = self.join.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_generates_distinct_worker_ids() {
        let a = WorkerConfig::new(Duration::from_secs(1));
        let b = WorkerConfig::new(Duration::from_secs(1));
        assert!(a.worker_id.starts_with("worker-"));
        assert_ne!(a.worker_id, b.worker_id);
    }

    #[test]
    fn config_with_explicit_worker_id() {
        let config = WorkerConfig::with_worker_id(Duration::from_secs(1), "sweeper-1");
        assert_eq!(config.worker_id, "sweeper-1");
    }
}
