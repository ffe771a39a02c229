//! Pull-style scheduler for agent jobs.
//!
//! A client hires a remote agent by manifest URL, optionally binds a payment
//! wallet to the hire, and registers jobs that invoke one of the agent's
//! entrypoints on a schedule — once at a wall-clock instant, or repeatedly at
//! a fixed interval. Worker processes poll the store, atomically lease due
//! jobs, call the invoker, and reschedule, retry, or finalize based on
//! outcome.
//!
//! # Architecture
//!
//! ```text
//! Client ──► SchedulerRuntime::create_hire / add_job ──► Store
//!
//! Worker (fixed period)
//!     │
//!     ├─► SchedulerRuntime::tick
//!     │       ├─► Store::get_due_jobs / Store::claim_job
//!     │       ├─► Invoker::invoke (with the resolved wallet, if any)
//!     │       └─► Store::put_job (completed / rescheduled / retried / failed)
//!     └─► SchedulerRuntime::recover_expired_leases
//! ```
//!
//! The store is the only concurrency boundary: [`Store::claim_job`] is the
//! atomic primitive that keeps at most one worker on a job at a time, and the
//! lease window doubles as a crash timeout — stalled jobs come back through
//! [`SchedulerRuntime::recover_expired_leases`]. The runtime holds no
//! in-process lock across an invoker call.
//!
//! Agent invocation and wallet handling are collaborator contracts
//! ([`Invoker`], [`WalletResolver`]); concrete protocol clients and payment
//! stacks live with the embedder.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use scheduler::{
//!     CreateHire, InMemoryStore, RuntimeConfig, Schedule, SchedulerRuntime, Worker,
//! };
//!
//! let runtime = Arc::new(SchedulerRuntime::new(
//!     RuntimeConfig::builder()
//!         .store(Arc::new(InMemoryStore::new()))
//!         .invoker(my_invoker)
//!         .build(),
//! )?);
//!
//! runtime
//!     .create_hire(
//!         CreateHire::builder()
//!             .manifest_url("https://agent.example.com")
//!             .entrypoint_key("summarize")
//!             .schedule(Schedule::Interval { every_ms: 60_000 })
//!             .build(),
//!     )
//!     .await?;
//!
//! let handle = Worker::new(runtime, Duration::from_secs(5)).start();
//! // ... later:
//! handle.stop().await;
//! ```

mod backoff;
pub mod clock;
pub mod error;
pub mod hire;
pub mod invoker;
pub mod job;
pub mod manifest;
pub mod memory;
pub mod runtime;
pub mod store;
pub mod testing;
pub mod worker;

pub use clock::{Clock, SystemClock};
pub use error::{Result, SchedulerError};
pub use hire::{AgentBinding, Hire, HireStatus, WalletRef};
pub use invoker::{InvocationArgs, Invoker, InvokerAdapter, WalletHandle, WalletResolver};
pub use job::{Job, JobStatus, Lease, Schedule};
pub use manifest::{AgentManifest, HttpManifestFetcher, ManifestError, ManifestFetcher};
pub use memory::InMemoryStore;
pub use runtime::{
    AddJob, ControlOutcome, CreateHire, RuntimeConfig, SchedulerRuntime, TickOptions, TickSummary,
};
pub use store::Store;
pub use worker::{Worker, WorkerConfig, WorkerHandle};
