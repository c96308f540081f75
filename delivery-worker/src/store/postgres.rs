//! Postgres-backed job store.
//!
//! Every statement is scoped by `tenant_id`. Claiming uses a conditional
//! `UPDATE ... RETURNING` on the lease columns, and history inserts are keyed
//! by `(job_id, attempt)` so a replayed invocation converges on the same rows.
//! The expected schema lives in `migrations/`.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use super::{BounceLedger, JobStore};
use crate::error::StoreError;
use crate::model::{DeliveryJob, DeliveryMethod, HistoryEntry, JobScope, JobStatus};

const JOB_COLUMNS: &str = "id, tenant_id, campaign_id, buyer_id, delivery_method_id, delivery_id, \
     payload::text AS payload, status, attempts, last_error, due_at, lease_token";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `url`.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .max_lifetime(Duration::from_secs(300))
            .connect(url)
            .await?;

        info!(max_connections = max_connections, "database_connected");
        Ok(Self::new(pool))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn job_from_row(row: &PgRow) -> Result<DeliveryJob, StoreError> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<JobStatus>()
        .map_err(|e| StoreError::Database(sqlx::Error::Decode(e.into())))?;
    let attempts: i32 = row.try_get("attempts")?;
    let payload: String = row.try_get("payload")?;

    Ok(DeliveryJob {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        campaign_id: row.try_get("campaign_id")?,
        buyer_id: row.try_get("buyer_id")?,
        delivery_method_id: row.try_get("delivery_method_id")?,
        delivery_id: row.try_get("delivery_id")?,
        payload: payload.into_bytes(),
        status,
        attempts: u32::try_from(attempts).unwrap_or(0),
        last_error: row.try_get("last_error")?,
        due_at: row.try_get("due_at")?,
        lease_token: row.try_get("lease_token")?,
    })
}

fn to_i64(count: u64) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

#[async_trait]
impl JobStore for PgStore {
    async fn fetch_due_jobs(
        &self,
        scope: JobScope,
        limit: usize,
    ) -> Result<Vec<DeliveryJob>, StoreError> {
        let tenant_id = match scope {
            JobScope::Global => None,
            JobScope::Tenant(id) => Some(id),
        };

        let sql = format!(
            "SELECT {JOB_COLUMNS}
             FROM delivery_jobs
             WHERE status = 'pending'
               AND due_at <= now()
               AND (lease_expires_at IS NULL OR lease_expires_at < now())
               AND ($1::uuid IS NULL OR tenant_id = $1)
             ORDER BY due_at ASC, id ASC
             LIMIT $2"
        );

        let rows = sqlx::query(&sql)
            .bind(tenant_id)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(job_from_row).collect()
    }

    async fn claim_job(
        &self,
        job: &DeliveryJob,
        lease: Duration,
    ) -> Result<Option<DeliveryJob>, StoreError> {
        let sql = format!(
            "UPDATE delivery_jobs
             SET attempts = attempts + 1,
                 lease_token = $3,
                 lease_expires_at = now() + make_interval(secs => $4),
                 updated_at = now()
             WHERE id = $1
               AND tenant_id = $2
               AND status = 'pending'
               AND due_at <= now()
               AND (lease_expires_at IS NULL OR lease_expires_at < now())
             RETURNING {JOB_COLUMNS}"
        );

        let row = sqlx::query(&sql)
            .bind(job.id)
            .bind(job.tenant_id)
            .bind(Uuid::new_v4())
            .bind(lease.as_secs_f64())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn delivery_method(
        &self,
        tenant_id: Uuid,
        method_id: Uuid,
    ) -> Result<DeliveryMethod, StoreError> {
        let row = sqlx::query(
            "SELECT id, tenant_id, buyer_id, method_type, config, is_active
             FROM delivery_methods
             WHERE id = $1 AND tenant_id = $2",
        )
        .bind(method_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("delivery method", method_id))?;

        let config: Option<serde_json::Value> = row.try_get("config")?;
        Ok(DeliveryMethod {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            buyer_id: row.try_get("buyer_id")?,
            method_type: row.try_get("method_type")?,
            config: config.unwrap_or(serde_json::Value::Null),
            active: row.try_get("is_active")?,
        })
    }

    async fn update_job_status(
        &self,
        job: &DeliveryJob,
        status: JobStatus,
        last_error: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE delivery_jobs
             SET status = $3,
                 last_error = $4,
                 lease_token = NULL,
                 lease_expires_at = NULL,
                 updated_at = now()
             WHERE id = $1 AND tenant_id = $2 AND lease_token = $5",
        )
        .bind(job.id)
        .bind(job.tenant_id)
        .bind(status.as_str())
        .bind(last_error)
        .bind(job.lease_token)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::LostClaim(job.id));
        }
        Ok(())
    }

    async fn update_delivery_status(
        &self,
        tenant_id: Uuid,
        delivery_id: Uuid,
        status: JobStatus,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE deliveries SET status = $3, updated_at = now()
             WHERE id = $1 AND tenant_id = $2",
        )
        .bind(delivery_id)
        .bind(tenant_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("delivery", delivery_id));
        }
        Ok(())
    }

    async fn increment_campaign_delivered(
        &self,
        tenant_id: Uuid,
        campaign_id: Uuid,
        count: u64,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE campaigns
             SET delivered_lead_count = delivered_lead_count + $3, updated_at = now()
             WHERE id = $1 AND tenant_id = $2",
        )
        .bind(campaign_id)
        .bind(tenant_id)
        .bind(to_i64(count))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("campaign", campaign_id));
        }
        Ok(())
    }

    async fn append_history(&self, entry: &HistoryEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO delivery_history
                 (tenant_id, job_id, attempt, buyer_id, delivery_method_id, status, error_message)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (job_id, attempt) DO NOTHING",
        )
        .bind(entry.tenant_id)
        .bind(entry.job_id)
        .bind(i32::try_from(entry.attempt).unwrap_or(i32::MAX))
        .bind(entry.buyer_id)
        .bind(entry.delivery_method_id)
        .bind(entry.status.as_str())
        .bind(entry.error_message.as_deref())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl BounceLedger for PgStore {
    async fn hard_bounce_count(&self, email: &str) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM email_bounces
             WHERE lower(email) = lower($1) AND bounce_type = 'Permanent'",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await?;

        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn complaint_count(&self, email: &str) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM email_complaints WHERE lower(email) = lower($1)",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await?;

        Ok(u64::try_from(count).unwrap_or(0))
    }
}
