//! Integration tests against a live PostgreSQL.
//!
//! These are ignored by default; point `DATABASE_URL` at a scratch database
//! and run with `cargo test -p scheduler-postgres -- --ignored`.

use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use scheduler::{AgentBinding, Hire, HireStatus, Job, JobStatus, Schedule, Store, WalletRef};
use scheduler_postgres::PgStore;

fn ts(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap()
}

async fn store() -> PgStore {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a scratch database");
    let store = PgStore::connect(&url).await.unwrap();
    store.ensure_schema().await.unwrap();
    store
}

fn sample_hire() -> Hire {
    Hire::builder()
        .agent(AgentBinding {
            manifest_url: "https://agent.example.com".to_string(),
            card: None,
            cached_at: None,
        })
        .wallet(Some(WalletRef {
            id: "wal-1".to_string(),
            address: "0xabc".to_string(),
            chain: "base".to_string(),
            chain_type: "evm".to_string(),
            provider: "cdp".to_string(),
        }))
        .build()
}

fn sample_job(hire_id: Uuid, next_run_at: DateTime<Utc>) -> Job {
    Job::builder()
        .hire_id(hire_id)
        .entrypoint_key("summarize".to_string())
        .input(json!({ "doc": "hello" }))
        .schedule(Schedule::Interval { every_ms: 60_000 })
        .next_run_at(next_run_at)
        .build()
}

#[tokio::test]
#[ignore = "requires PostgreSQL via DATABASE_URL"]
async fn hire_round_trips_with_wallet_and_status() {
    let store = store().await;
    let hire = sample_hire();

    store.put_hire(hire.clone()).await.unwrap();
    let loaded = store.get_hire(hire.id).await.unwrap().unwrap();

    assert_eq!(loaded.agent.manifest_url, hire.agent.manifest_url);
    assert_eq!(loaded.status, HireStatus::Active);
    assert_eq!(loaded.wallet, hire.wallet);

    store.delete_hire(hire.id).await.unwrap();
    assert!(store.get_hire(hire.id).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires PostgreSQL via DATABASE_URL"]
async fn job_round_trips_including_schedule() {
    let store = store().await;
    let job = sample_job(Uuid::new_v4(), ts(1_000_000));

    store.put_job(job.clone()).await.unwrap();
    let loaded = store.get_job(job.id).await.unwrap().unwrap();

    assert_eq!(loaded.entrypoint_key, "summarize");
    assert_eq!(loaded.schedule, Schedule::Interval { every_ms: 60_000 });
    assert_eq!(loaded.status, JobStatus::Pending);
    assert!(loaded.lease.is_none());
}

#[tokio::test]
#[ignore = "requires PostgreSQL via DATABASE_URL"]
async fn claim_is_conditional_and_exclusive() {
    let store = store().await;
    let now = ts(1_000_000);
    let job = sample_job(Uuid::new_v4(), now);
    store.put_job(job.clone()).await.unwrap();

    assert!(store.claim_job(job.id, "w1", 30_000, now).await.unwrap());
    assert!(!store.claim_job(job.id, "w2", 30_000, now).await.unwrap());

    let claimed = store.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(claimed.status, JobStatus::Leased);
    assert_eq!(claimed.lease.unwrap().worker_id, "w1");

    // A job that is not yet due cannot be claimed.
    let future_job = sample_job(Uuid::new_v4(), ts(2_000_000));
    store.put_job(future_job.clone()).await.unwrap();
    assert!(!store.claim_job(future_job.id, "w1", 30_000, now).await.unwrap());
}

#[tokio::test]
#[ignore = "requires PostgreSQL via DATABASE_URL"]
async fn due_query_orders_oldest_first_and_reports_expired_leases() {
    let store = store().await;
    let now = ts(1_000_000);
    let hire_id = Uuid::new_v4();

    let early = sample_job(hire_id, ts(900_000));
    let late = sample_job(hire_id, ts(950_000));
    store.put_job(late.clone()).await.unwrap();
    store.put_job(early.clone()).await.unwrap();

    let due = store.get_due_jobs(now, 10).await.unwrap();
    let positions: Vec<Uuid> = due.iter().map(|j| j.id).collect();
    let early_pos = positions.iter().position(|id| *id == early.id).unwrap();
    let late_pos = positions.iter().position(|id| *id == late.id).unwrap();
    assert!(early_pos < late_pos);

    assert!(store.claim_job(early.id, "w1", 1_000, now).await.unwrap());
    let expired = store.get_expired_leases(ts(1_002_000)).await.unwrap();
    assert!(expired.iter().any(|j| j.id == early.id));
}
