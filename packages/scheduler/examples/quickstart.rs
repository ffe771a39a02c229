//! Minimal end-to-end run against the in-memory store.
//!
//! Wires a runtime with programmable collaborators, hires an "agent", and
//! lets a worker sweep for a couple of seconds. Run with:
//!
//! ```sh
//! RUST_LOG=scheduler=debug cargo run -p scheduler --example quickstart
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use scheduler::testing::{manifest_with_entrypoints, StaticManifestFetcher};
use scheduler::{
    CreateHire, InMemoryStore, InvocationArgs, Invoker, RuntimeConfig, Schedule, SchedulerRuntime,
    Worker,
};

/// Stand-in for a real agent-protocol client.
struct EchoInvoker;

#[async_trait]
impl Invoker for EchoInvoker {
    async fn invoke(&self, args: InvocationArgs) -> Result<serde_json::Value> {
        info!(
            job_id = %args.job_id,
            entrypoint = %args.entrypoint_key,
            "invoking agent"
        );
        Ok(json!({ "echo": args.input }))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "scheduler=debug".to_string()),
        )
        .init();

    let fetcher = Arc::new(StaticManifestFetcher::new());
    fetcher.insert(
        "https://agent.example.com",
        manifest_with_entrypoints(&["summarize"]),
    );

    let store = Arc::new(InMemoryStore::new());
    let runtime = Arc::new(SchedulerRuntime::new(
        RuntimeConfig::builder()
            .store(store.clone())
            .manifest_fetcher(fetcher)
            .invoker(Arc::new(EchoInvoker))
            .build(),
    )?);

    let (hire, job) = runtime
        .create_hire(
            CreateHire::builder()
                .manifest_url("https://agent.example.com")
                .entrypoint_key("summarize")
                .schedule(Schedule::Interval { every_ms: 500 })
                .job_input(json!({ "doc": "the quick brown fox" }))
                .build(),
        )
        .await?;
    info!(hire_id = %hire.id, job_id = %job.id, "hire registered");

    let handle = Worker::new(runtime.clone(), Duration::from_millis(250)).start();
    tokio::time::sleep(Duration::from_secs(2)).await;
    handle.stop().await;

    for job in store.jobs() {
        info!(job_id = %job.id, status = ?job.status, attempts = job.attempts, "final job state");
    }

    Ok(())
}
