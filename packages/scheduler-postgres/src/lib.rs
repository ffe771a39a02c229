//! PostgreSQL implementation of the scheduler's [`Store`] contract.
//!
//! Every conditional transition is a single-statement `UPDATE` guarded by the
//! current status, so claims are atomic without explicit transactions: two
//! workers racing on `claim_job` resolve on the row lock, and exactly one
//! sees `rows_affected = 1`.
//!
//! # Database Schema
//!
//! ```sql
//! CREATE TABLE hires (
//!     id UUID PRIMARY KEY,
//!     manifest_url TEXT NOT NULL,
//!     card JSONB,
//!     cached_at TIMESTAMPTZ,
//!     wallet JSONB,
//!     status TEXT NOT NULL,
//!     metadata JSONB,
//!     created_at TIMESTAMPTZ NOT NULL,
//!     updated_at TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE TABLE jobs (
//!     id UUID PRIMARY KEY,
//!     hire_id UUID NOT NULL,
//!     entrypoint_key TEXT NOT NULL,
//!     input JSONB NOT NULL,
//!     schedule JSONB NOT NULL,
//!     next_run_at TIMESTAMPTZ NOT NULL,
//!     attempts INTEGER NOT NULL,
//!     max_retries INTEGER NOT NULL,
//!     status TEXT NOT NULL,
//!     lease_worker_id TEXT,
//!     lease_expires_at TIMESTAMPTZ,
//!     idempotency_key TEXT,
//!     last_error TEXT,
//!     created_at TIMESTAMPTZ NOT NULL,
//!     updated_at TIMESTAMPTZ NOT NULL
//! );
//! ```
//!
//! `ensure_schema` applies this DDL idempotently, which keeps local setups
//! and tests to one call; production deployments can run the same statements
//! through their own migration tooling.
//!
//! # Usage
//!
//! ```rust,ignore
//! use scheduler_postgres::PgStore;
//!
//! let store = PgStore::connect("postgres://localhost/agents").await?;
//! store.ensure_schema().await?;
//!
//! let runtime = SchedulerRuntime::new(
//!     RuntimeConfig::builder()
//!         .store(Arc::new(store))
//!         .invoker(invoker)
//!         .build(),
//! )?;
//! ```

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use scheduler::{
    AgentBinding, AgentManifest, Hire, HireStatus, Job, JobStatus, Lease, Store, WalletRef,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS hires (
    id UUID PRIMARY KEY,
    manifest_url TEXT NOT NULL,
    card JSONB,
    cached_at TIMESTAMPTZ,
    wallet JSONB,
    status TEXT NOT NULL,
    metadata JSONB,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS jobs (
    id UUID PRIMARY KEY,
    hire_id UUID NOT NULL,
    entrypoint_key TEXT NOT NULL,
    input JSONB NOT NULL,
    schedule JSONB NOT NULL,
    next_run_at TIMESTAMPTZ NOT NULL,
    attempts INTEGER NOT NULL,
    max_retries INTEGER NOT NULL,
    status TEXT NOT NULL,
    lease_worker_id TEXT,
    lease_expires_at TIMESTAMPTZ,
    idempotency_key TEXT,
    last_error TEXT,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_due
    ON jobs (next_run_at) WHERE status = 'pending';
CREATE INDEX IF NOT EXISTS idx_jobs_lease
    ON jobs (lease_expires_at) WHERE status = 'leased';
"#;

const JOB_COLUMNS: &str = "id, hire_id, entrypoint_key, input, schedule, next_run_at, \
     attempts, max_retries, status, lease_worker_id, lease_expires_at, \
     idempotency_key, last_error, created_at, updated_at";

/// PostgreSQL-backed [`Store`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the given database URL.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    /// Apply the schema idempotently.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn put_hire(&self, hire: Hire) -> Result<()> {
        let card = hire
            .agent
            .card
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let wallet = hire.wallet.as_ref().map(serde_json::to_value).transpose()?;
        let metadata = hire
            .metadata
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO hires (
                id, manifest_url, card, cached_at, wallet, status, metadata,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                manifest_url = EXCLUDED.manifest_url,
                card = EXCLUDED.card,
                cached_at = EXCLUDED.cached_at,
                wallet = EXCLUDED.wallet,
                status = EXCLUDED.status,
                metadata = EXCLUDED.metadata,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(hire.id)
        .bind(&hire.agent.manifest_url)
        .bind(card)
        .bind(hire.agent.cached_at)
        .bind(wallet)
        .bind(hire.status.as_str())
        .bind(metadata)
        .bind(hire.created_at)
        .bind(hire.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_hire(&self, id: Uuid) -> Result<Option<Hire>> {
        let row = sqlx::query(
            r#"
            SELECT id, manifest_url, card, cached_at, wallet, status, metadata,
                   created_at, updated_at
            FROM hires
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| hire_from_row(&row)).transpose()
    }

    async fn delete_hire(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM hires WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn put_job(&self, job: Job) -> Result<()> {
        let schedule = serde_json::to_value(&job.schedule)?;
        let (lease_worker_id, lease_expires_at) = match &job.lease {
            Some(lease) => (Some(lease.worker_id.clone()), Some(lease.expires_at)),
            None => (None, None),
        };

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, hire_id, entrypoint_key, input, schedule, next_run_at,
                attempts, max_retries, status, lease_worker_id, lease_expires_at,
                idempotency_key, last_error, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (id) DO UPDATE SET
                entrypoint_key = EXCLUDED.entrypoint_key,
                input = EXCLUDED.input,
                schedule = EXCLUDED.schedule,
                next_run_at = EXCLUDED.next_run_at,
                attempts = EXCLUDED.attempts,
                max_retries = EXCLUDED.max_retries,
                status = EXCLUDED.status,
                lease_worker_id = EXCLUDED.lease_worker_id,
                lease_expires_at = EXCLUDED.lease_expires_at,
                idempotency_key = EXCLUDED.idempotency_key,
                last_error = EXCLUDED.last_error,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(job.id)
        .bind(job.hire_id)
        .bind(&job.entrypoint_key)
        .bind(&job.input)
        .bind(schedule)
        .bind(job.next_run_at)
        .bind(job.attempts)
        .bind(job.max_retries)
        .bind(job.status.as_str())
        .bind(lease_worker_id)
        .bind(lease_expires_at)
        .bind(&job.idempotency_key)
        .bind(&job.last_error)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| job_from_row(&row)).transpose()
    }

    async fn get_due_jobs(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE status = 'pending'
              AND next_run_at <= $1
            ORDER BY next_run_at ASC, created_at ASC
            LIMIT $2
            "#
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    /// Conditional single-statement update; the row lock arbitrates racing
    /// workers and at most one sees an affected row.
    async fn claim_job(
        &self,
        job_id: Uuid,
        worker_id: &str,
        lease_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let lease_expires_at = now + Duration::milliseconds(lease_ms);

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'leased',
                lease_worker_id = $2,
                lease_expires_at = $3,
                updated_at = $4
            WHERE id = $1
              AND status = 'pending'
              AND next_run_at <= $4
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(lease_expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE status = 'leased'
              AND lease_expires_at <= $1
            "#
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }
}

fn hire_from_row(row: &PgRow) -> Result<Hire> {
    let status_raw: String = row.try_get("status")?;
    let status = HireStatus::from_str(&status_raw)
        .ok_or_else(|| anyhow!("unknown hire status: {status_raw}"))?;

    let card = row
        .try_get::<Option<serde_json::Value>, _>("card")?
        .map(serde_json::from_value::<AgentManifest>)
        .transpose()?;
    let wallet = row
        .try_get::<Option<serde_json::Value>, _>("wallet")?
        .map(serde_json::from_value::<WalletRef>)
        .transpose()?;
    let metadata = row
        .try_get::<Option<serde_json::Value>, _>("metadata")?
        .map(serde_json::from_value::<HashMap<String, serde_json::Value>>)
        .transpose()?;

    Ok(Hire {
        id: row.try_get("id")?,
        agent: AgentBinding {
            manifest_url: row.try_get("manifest_url")?,
            card,
            cached_at: row.try_get("cached_at")?,
        },
        wallet,
        status,
        metadata,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn job_from_row(row: &PgRow) -> Result<Job> {
    let status_raw: String = row.try_get("status")?;
    let status = JobStatus::from_str(&status_raw)
        .ok_or_else(|| anyhow!("unknown job status: {status_raw}"))?;

    let lease = match (
        row.try_get::<Option<String>, _>("lease_worker_id")?,
        row.try_get::<Option<DateTime<Utc>>, _>("lease_expires_at")?,
    ) {
        (Some(worker_id), Some(expires_at)) => Some(Lease {
            worker_id,
            expires_at,
        }),
        _ => None,
    };

    Ok(Job {
        id: row.try_get("id")?,
        hire_id: row.try_get("hire_id")?,
        entrypoint_key: row.try_get("entrypoint_key")?,
        input: row.try_get("input")?,
        schedule: serde_json::from_value(row.try_get::<serde_json::Value, _>("schedule")?)?,
        next_run_at: row.try_get("next_run_at")?,
        attempts: row.try_get("attempts")?,
        max_retries: row.try_get("max_retries")?,
        status,
        lease,
        idempotency_key: row.try_get("idempotency_key")?,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
