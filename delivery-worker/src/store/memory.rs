//! In-process job store.
//!
//! Mirrors the claim and idempotency rules of the Postgres store. Individual
//! operations can be made to fail with [`MemoryStore::fail_on`] to exercise
//! partial-failure paths.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{BounceLedger, JobStore};
use crate::error::StoreError;
use crate::model::{DeliveryJob, DeliveryMethod, HistoryEntry, JobScope, JobStatus};

/// Store operation that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    FetchDueJobs,
    ClaimJob,
    DeliveryMethod,
    UpdateJobStatus,
    UpdateDeliveryStatus,
    IncrementCampaign,
    AppendHistory,
    BounceLookup,
}

struct StoredJob {
    job: DeliveryJob,
    lease_expires_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Inner {
    jobs: Vec<StoredJob>,
    methods: HashMap<(Uuid, Uuid), DeliveryMethod>,
    deliveries: HashMap<(Uuid, Uuid), JobStatus>,
    campaigns: HashMap<(Uuid, Uuid), u64>,
    history: Vec<HistoryEntry>,
    hard_bounces: HashMap<String, u64>,
    complaints: HashMap<String, u64>,
    failing: HashSet<StoreOp>,
}

impl Inner {
    fn check(&self, op: StoreOp) -> Result<(), StoreError> {
        if self.failing.contains(&op) {
            return Err(StoreError::Unavailable(format!("injected failure: {op:?}")));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    fn with_inner<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    pub fn insert_job(&self, job: DeliveryJob) {
        self.with_inner(|inner| {
            inner.jobs.push(StoredJob {
                job,
                lease_expires_at: None,
            })
        });
    }

    pub fn insert_method(&self, method: DeliveryMethod) {
        self.with_inner(|inner| {
            inner
                .methods
                .insert((method.tenant_id, method.id), method);
        });
    }

    pub fn insert_delivery(&self, tenant_id: Uuid, delivery_id: Uuid) {
        self.with_inner(|inner| {
            inner
                .deliveries
                .insert((tenant_id, delivery_id), JobStatus::Pending);
        });
    }

    pub fn insert_campaign(&self, tenant_id: Uuid, campaign_id: Uuid) {
        self.with_inner(|inner| {
            inner.campaigns.insert((tenant_id, campaign_id), 0);
        });
    }

    pub fn record_hard_bounce(&self, email: &str) {
        self.with_inner(|inner| {
            *inner.hard_bounces.entry(normalize_email(email)).or_default() += 1;
        });
    }

    pub fn record_complaint(&self, email: &str) {
        self.with_inner(|inner| {
            *inner.complaints.entry(normalize_email(email)).or_default() += 1;
        });
    }

    /// Make every subsequent call of `op` fail with [`StoreError::Unavailable`].
    pub fn fail_on(&self, op: StoreOp) {
        self.with_inner(|inner| {
            inner.failing.insert(op);
        });
    }

    pub fn job(&self, job_id: Uuid) -> Option<DeliveryJob> {
        self.with_inner(|inner| {
            inner
                .jobs
                .iter()
                .find(|stored| stored.job.id == job_id)
                .map(|stored| stored.job.clone())
        })
    }

    pub fn delivery_status(&self, tenant_id: Uuid, delivery_id: Uuid) -> Option<JobStatus> {
        self.with_inner(|inner| inner.deliveries.get(&(tenant_id, delivery_id)).copied())
    }

    pub fn campaign_delivered(&self, tenant_id: Uuid, campaign_id: Uuid) -> Option<u64> {
        self.with_inner(|inner| inner.campaigns.get(&(tenant_id, campaign_id)).copied())
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.with_inner(|inner| inner.history.clone())
    }
}

fn lease_is_free(stored: &StoredJob, now: DateTime<Utc>) -> bool {
    stored.job.lease_token.is_none() || stored.lease_expires_at.map_or(true, |at| at < now)
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn fetch_due_jobs(
        &self,
        scope: JobScope,
        limit: usize,
    ) -> Result<Vec<DeliveryJob>, StoreError> {
        let inner = self.lock()?;
        inner.check(StoreOp::FetchDueJobs)?;
        let now = Utc::now();

        let mut due: Vec<DeliveryJob> = inner
            .jobs
            .iter()
            .filter(|stored| !stored.job.status.is_terminal())
            .filter(|stored| stored.job.due_at <= now)
            .filter(|stored| lease_is_free(stored, now))
            .filter(|stored| match scope {
                JobScope::Global => true,
                JobScope::Tenant(tenant_id) => stored.job.tenant_id == tenant_id,
            })
            .map(|stored| stored.job.clone())
            .collect();

        due.sort_by_key(|job| job.due_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn claim_job(
        &self,
        job: &DeliveryJob,
        lease: Duration,
    ) -> Result<Option<DeliveryJob>, StoreError> {
        let mut inner = self.lock()?;
        inner.check(StoreOp::ClaimJob)?;
        let now = Utc::now();
        let lease = chrono::Duration::from_std(lease)
            .map_err(|e| StoreError::Unavailable(format!("invalid lease: {e}")))?;

        let Some(stored) = inner
            .jobs
            .iter_mut()
            .find(|stored| stored.job.id == job.id && stored.job.tenant_id == job.tenant_id)
        else {
            return Ok(None);
        };

        if stored.job.status.is_terminal()
            || stored.job.due_at > now
            || !lease_is_free(stored, now)
        {
            return Ok(None);
        }

        stored.job.attempts += 1;
        stored.job.lease_token = Some(Uuid::new_v4());
        stored.lease_expires_at = Some(now + lease);
        Ok(Some(stored.job.clone()))
    }

    async fn delivery_method(
        &self,
        tenant_id: Uuid,
        method_id: Uuid,
    ) -> Result<DeliveryMethod, StoreError> {
        let inner = self.lock()?;
        inner.check(StoreOp::DeliveryMethod)?;
        inner
            .methods
            .get(&(tenant_id, method_id))
            .cloned()
            .ok_or_else(|| StoreError::not_found("delivery method", method_id))
    }

    async fn update_job_status(
        &self,
        job: &DeliveryJob,
        status: JobStatus,
        last_error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.check(StoreOp::UpdateJobStatus)?;

        let stored = inner
            .jobs
            .iter_mut()
            .find(|stored| stored.job.id == job.id && stored.job.tenant_id == job.tenant_id)
            .ok_or_else(|| StoreError::not_found("delivery job", job.id))?;

        if job.lease_token.is_none() || stored.job.lease_token != job.lease_token {
            return Err(StoreError::LostClaim(job.id));
        }

        stored.job.status = status;
        stored.job.last_error = last_error.map(str::to_string);
        stored.job.lease_token = None;
        stored.lease_expires_at = None;
        Ok(())
    }

    async fn update_delivery_status(
        &self,
        tenant_id: Uuid,
        delivery_id: Uuid,
        status: JobStatus,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.check(StoreOp::UpdateDeliveryStatus)?;
        let current = inner
            .deliveries
            .get_mut(&(tenant_id, delivery_id))
            .ok_or_else(|| StoreError::not_found("delivery", delivery_id))?;
        *current = status;
        Ok(())
    }

    async fn increment_campaign_delivered(
        &self,
        tenant_id: Uuid,
        campaign_id: Uuid,
        count: u64,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.check(StoreOp::IncrementCampaign)?;
        let delivered = inner
            .campaigns
            .get_mut(&(tenant_id, campaign_id))
            .ok_or_else(|| StoreError::not_found("campaign", campaign_id))?;
        *delivered += count;
        Ok(())
    }

    async fn append_history(&self, entry: &HistoryEntry) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.check(StoreOp::AppendHistory)?;
        let exists = inner
            .history
            .iter()
            .any(|existing| existing.job_id == entry.job_id && existing.attempt == entry.attempt);
        if !exists {
            inner.history.push(entry.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl BounceLedger for MemoryStore {
    async fn hard_bounce_count(&self, email: &str) -> Result<u64, StoreError> {
        let inner = self.lock()?;
        inner.check(StoreOp::BounceLookup)?;
        Ok(inner
            .hard_bounces
            .get(&normalize_email(email))
            .copied()
            .unwrap_or(0))
    }

    async fn complaint_count(&self, email: &str) -> Result<u64, StoreError> {
        let inner = self.lock()?;
        inner.check(StoreOp::BounceLookup)?;
        Ok(inner
            .complaints
            .get(&normalize_email(email))
            .copied()
            .unwrap_or(0))
    }
}
