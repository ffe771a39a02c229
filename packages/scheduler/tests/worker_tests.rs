//! Worker loop behavior: periodic sweeps, lease recovery, cooperative stop.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;

use scheduler::testing::{
    manifest_with_entrypoints, ManualClock, MockInvoker, StaticManifestFetcher,
};
use scheduler::{
    CreateHire, InMemoryStore, JobStatus, Lease, RuntimeConfig, Schedule, SchedulerRuntime, Store,
    Worker, WorkerConfig,
};

const AGENT_URL: &str = "https://agent.example.com";
const ENTRYPOINT: &str = "summarize";
const T0_MS: i64 = 1_000_000;

fn ts(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap()
}

struct Fixture {
    runtime: Arc<SchedulerRuntime>,
    store: Arc<InMemoryStore>,
    invoker: Arc<MockInvoker>,
}

fn fixture() -> Fixture {
    let store = Arc::new(InMemoryStore::new());
    let fetcher = Arc::new(StaticManifestFetcher::new());
    fetcher.insert(AGENT_URL, manifest_with_entrypoints(&[ENTRYPOINT]));
    let invoker = Arc::new(MockInvoker::new());

    let runtime = Arc::new(
        SchedulerRuntime::new(
            RuntimeConfig::builder()
                .store(store.clone())
                .clock(Arc::new(ManualClock::at_epoch_ms(T0_MS)))
                .manifest_fetcher(fetcher)
                .invoker(invoker.clone())
                .build(),
        )
        .unwrap(),
    );

    Fixture {
        runtime,
        store,
        invoker,
    }
}

#[tokio::test]
async fn worker_processes_due_jobs_on_its_period() {
    let f = fixture();
    let (_, job) = f
        .runtime
        .create_hire(
            CreateHire::builder()
                .manifest_url(AGENT_URL)
                .entrypoint_key(ENTRYPOINT)
                .schedule(Schedule::Once { at: ts(T0_MS) })
                .job_input(json!({ "doc": "hello" }))
                .build(),
        )
        .await
        .unwrap();

    let worker = Worker::with_config(
        f.runtime.clone(),
        WorkerConfig::with_worker_id(Duration::from_millis(20), "sweeper-1"),
    );
    let handle = worker.start();

    tokio::time::sleep(Duration::from_millis(150)).await;
    handle.stop().await;

    assert_eq!(f.invoker.invocation_count(), 1);
    let job = f.store.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.lease.is_none());
}

#[tokio::test]
async fn worker_recovers_an_expired_lease_and_reruns_the_job() {
    let f = fixture();
    let (_, job) = f
        .runtime
        .create_hire(
            CreateHire::builder()
                .manifest_url(AGENT_URL)
                .entrypoint_key(ENTRYPOINT)
                .schedule(Schedule::Once { at: ts(T0_MS) })
                .build(),
        )
        .await
        .unwrap();

    // Simulate a worker that died mid-lease.
    let mut crashed = f.store.get_job(job.id).await.unwrap().unwrap();
    crashed.status = JobStatus::Leased;
    crashed.lease = Some(Lease {
        worker_id: "w-dead".to_string(),
        expires_at: ts(T0_MS - 1_000),
    });
    f.store.put_job(crashed).await.unwrap();

    let handle = Worker::new(f.runtime.clone(), Duration::from_millis(20)).start();
    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.stop().await;

    // The first sweep recovers the lease, a later sweep runs the job.
    assert_eq!(f.invoker.invocation_count(), 1);
    let job = f.store.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
}

#[tokio::test]
async fn worker_stops_cleanly_with_nothing_to_do() {
    let f = fixture();
    let handle = Worker::new(f.runtime.clone(), Duration::from_millis(20)).start();
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.stop().await;

    assert_eq!(f.invoker.invocation_count(), 0);
}

#[tokio::test]
async fn two_workers_share_a_store_without_double_execution() {
    let f = fixture();
    for i in 0..5 {
        f.runtime
            .create_hire(
                CreateHire::builder()
                    .manifest_url(AGENT_URL)
                    .entrypoint_key(ENTRYPOINT)
                    .schedule(Schedule::Once { at: ts(T0_MS) })
                    .job_input(json!({ "n": i }))
                    .build(),
            )
            .await
            .unwrap();
    }

    let a = Worker::with_config(
        f.runtime.clone(),
        WorkerConfig::with_worker_id(Duration::from_millis(10), "sweeper-a"),
    )
    .start();
    let b = Worker::with_config(
        f.runtime.clone(),
        WorkerConfig::with_worker_id(Duration::from_millis(10), "sweeper-b"),
    )
    .start();

    tokio::time::sleep(Duration::from_millis(200)).await;
    a.stop().await;
    b.stop().await;

    // Every job ran exactly once across both workers.
    assert_eq!(f.invoker.invocation_count(), 5);
    for job in f.store.jobs() {
        assert_eq!(job.status, JobStatus::Completed);
    }
}
