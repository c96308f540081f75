//! Job store interfaces.
//!
//! The pipeline only talks to persistence through these traits, so the
//! invocation can run against Postgres in production and against
//! [`MemoryStore`] in tests.
//!
//! Claiming is part of the contract: [`JobStore::claim_job`] is a conditional
//! update that increments `attempts` and stamps a lease token in one step, and
//! [`JobStore::update_job_status`] only succeeds while that token is held. Two
//! overlapping invocations therefore never deliver the same attempt twice.

pub mod memory;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{DeliveryJob, DeliveryMethod, HistoryEntry, JobScope, JobStatus};

pub use memory::{MemoryStore, StoreOp};
pub use postgres::PgStore;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Pending jobs whose due time has passed and which are not leased,
    /// ordered by due time. Read-only.
    async fn fetch_due_jobs(
        &self,
        scope: JobScope,
        limit: usize,
    ) -> Result<Vec<DeliveryJob>, StoreError>;

    /// Take a lease on `job` and increment its attempt counter.
    ///
    /// Returns `None` when the job is no longer claimable (already claimed,
    /// no longer pending, or not yet due).
    async fn claim_job(
        &self,
        job: &DeliveryJob,
        lease: Duration,
    ) -> Result<Option<DeliveryJob>, StoreError>;

    async fn delivery_method(
        &self,
        tenant_id: Uuid,
        method_id: Uuid,
    ) -> Result<DeliveryMethod, StoreError>;

    /// Persist the job's new status and release its lease.
    async fn update_job_status(
        &self,
        job: &DeliveryJob,
        status: JobStatus,
        last_error: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn update_delivery_status(
        &self,
        tenant_id: Uuid,
        delivery_id: Uuid,
        status: JobStatus,
    ) -> Result<(), StoreError>;

    async fn increment_campaign_delivered(
        &self,
        tenant_id: Uuid,
        campaign_id: Uuid,
        count: u64,
    ) -> Result<(), StoreError>;

    /// Append a history entry. Replaying the same `(job_id, attempt)` is a no-op.
    async fn append_history(&self, entry: &HistoryEntry) -> Result<(), StoreError>;
}

/// Locally recorded bounce and complaint events, written by the email-event
/// webhook and read by the suppression gate.
#[async_trait]
pub trait BounceLedger: Send + Sync {
    async fn hard_bounce_count(&self, email: &str) -> Result<u64, StoreError>;

    async fn complaint_count(&self, email: &str) -> Result<u64, StoreError>;
}
