//! One invocation of the delivery pipeline.
//!
//! ```text
//! fetch due jobs ─→ for each job (up to `concurrency` at once):
//!                     claim → decode → method lookup
//!                           → dispatch (CSV rendered by the channel)
//!                           → classify → record
//! ```
//!
//! Channel and payload errors stop at the job boundary and become a status
//! transition. Store failures while fetching abort the invocation; store
//! failures while recording a job are counted in the report and the loop
//! carries on with the next job.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::classify::classify;
use crate::dispatch::{export_filename, Delivery, Dispatcher};
use crate::error::{DeliveryError, StoreError};
use crate::model::{DeliveryJob, HistoryStatus, JobScope};
use crate::payload::{decode_payload, DecodedPayload};
use crate::state::{CampaignCredit, JobStateManager};
use crate::store::JobStore;

/// Upper bound on the part of a lease kept back for the state writes.
const MAX_RECORDING_RESERVE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub scope: JobScope,
    pub batch_limit: usize,
    pub max_retries: u32,
    pub concurrency: usize,
    pub lease: Duration,
}

impl PipelineSettings {
    /// Time a claimed job may spend delivering. The rest of the lease is
    /// reserved for recording the outcome, so the lease cannot lapse while
    /// the job is still in flight.
    pub fn delivery_window(&self) -> Duration {
        let reserve = (self.lease / 5).min(MAX_RECORDING_RESERVE);
        self.lease.saturating_sub(reserve)
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            scope: JobScope::Global,
            batch_limit: 50,
            max_retries: crate::classify::DEFAULT_MAX_RETRIES,
            concurrency: 1,
            lease: Duration::from_secs(600),
        }
    }
}

/// Counters for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationReport {
    pub fetched: usize,
    pub claimed: usize,
    /// Claimed elsewhere before this invocation got to them.
    pub skipped: usize,
    pub succeeded: usize,
    pub retry_scheduled: usize,
    pub failed: usize,
    pub suppressed: usize,
    /// Left untouched because the deadline passed.
    pub deferred: usize,
    pub persistence_failures: usize,
}

impl InvocationReport {
    fn tally(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Deferred => self.deferred += 1,
            JobOutcome::Skipped => self.skipped += 1,
            JobOutcome::PersistenceFailed { claimed } => {
                self.claimed += usize::from(claimed);
                self.persistence_failures += 1;
            }
            JobOutcome::Recorded(status) => {
                self.claimed += 1;
                match status {
                    HistoryStatus::Success => self.succeeded += 1,
                    HistoryStatus::RetryScheduled => self.retry_scheduled += 1,
                    HistoryStatus::Failed => self.failed += 1,
                    HistoryStatus::Suppressed => self.suppressed += 1,
                }
            }
        }
    }
}

/// What happened to one fetched job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Deferred,
    Skipped,
    Recorded(HistoryStatus),
    PersistenceFailed { claimed: bool },
}

pub struct Pipeline {
    store: Arc<dyn JobStore>,
    dispatcher: Arc<Dispatcher>,
    state: JobStateManager,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn JobStore>,
        dispatcher: Arc<Dispatcher>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            state: JobStateManager::new(store.clone()),
            store,
            dispatcher,
            settings,
        }
    }

    /// Process the currently due jobs. Jobs not yet started when `deadline`
    /// passes are left pending for the next invocation.
    pub async fn run_invocation(&self, deadline: Instant) -> Result<InvocationReport, StoreError> {
        let started = Instant::now();
        info!(
            scope = ?self.settings.scope,
            batch_limit = self.settings.batch_limit,
            concurrency = self.settings.concurrency,
            "invocation_started"
        );

        let jobs = self
            .store
            .fetch_due_jobs(self.settings.scope, self.settings.batch_limit)
            .await?;
        info!(count = jobs.len(), "due_jobs_fetched");

        let mut report = InvocationReport {
            fetched: jobs.len(),
            ..Default::default()
        };

        let outcomes: Vec<JobOutcome> = stream::iter(jobs)
            .map(|job| async move {
                if Instant::now() >= deadline {
                    return JobOutcome::Deferred;
                }
                self.process_job(job).await
            })
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            report.tally(outcome);
        }

        if report.deferred > 0 {
            warn!(deferred = report.deferred, "invocation_deadline_reached");
        }

        info!(
            fetched = report.fetched,
            claimed = report.claimed,
            skipped = report.skipped,
            succeeded = report.succeeded,
            retry_scheduled = report.retry_scheduled,
            failed = report.failed,
            suppressed = report.suppressed,
            deferred = report.deferred,
            persistence_failures = report.persistence_failures,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "invocation_complete"
        );

        Ok(report)
    }

    /// Claim, deliver and record one job.
    pub async fn process_job(&self, job: DeliveryJob) -> JobOutcome {
        let job = match self.store.claim_job(&job, self.settings.lease).await {
            Ok(Some(claimed)) => claimed,
            Ok(None) => {
                info!(job_id = %job.id, tenant_id = %job.tenant_id, "delivery_job_claim_lost");
                return JobOutcome::Skipped;
            }
            Err(e) => {
                error!(job_id = %job.id, tenant_id = %job.tenant_id, error = %e, "delivery_job_claim_failed");
                return JobOutcome::PersistenceFailed { claimed: false };
            }
        };

        let claimed_at = Instant::now();
        info!(
            job_id = %job.id,
            tenant_id = %job.tenant_id,
            attempt = job.attempts,
            buyer_id = %job.buyer_id,
            "delivery_job_claimed"
        );

        let (outcome, credit) = match decode_payload(&job.payload) {
            Ok(payload) => {
                let credit = payload.campaign_id.map(|campaign_id| CampaignCredit {
                    campaign_id,
                    total_leads: payload.total_leads,
                });
                (self.deliver(&job, &payload, claimed_at).await, credit)
            }
            Err(e) => (Err(e), None),
        };

        let transition = classify(&outcome, job.attempts, self.settings.max_retries);
        match &outcome {
            Ok(()) => info!(
                job_id = %job.id,
                tenant_id = %job.tenant_id,
                attempt = job.attempts,
                status = %transition.job_status,
                history_status = %transition.history_status,
                "delivery_outcome_classified"
            ),
            Err(e) => warn!(
                job_id = %job.id,
                tenant_id = %job.tenant_id,
                attempt = job.attempts,
                status = %transition.job_status,
                history_status = %transition.history_status,
                error_kind = e.kind(),
                error = %e,
                "delivery_outcome_classified"
            ),
        }

        match self.state.record(&job, &transition, credit).await {
            Ok(()) => JobOutcome::Recorded(transition.history_status),
            Err(StoreError::LostClaim(_)) => {
                warn!(
                    job_id = %job.id,
                    tenant_id = %job.tenant_id,
                    attempt = job.attempts,
                    "delivery_job_claim_lost"
                );
                JobOutcome::PersistenceFailed { claimed: true }
            }
            Err(e) => {
                error!(
                    job_id = %job.id,
                    tenant_id = %job.tenant_id,
                    attempt = job.attempts,
                    error = %e,
                    "delivery_state_write_failed"
                );
                JobOutcome::PersistenceFailed { claimed: true }
            }
        }
    }

    async fn deliver(
        &self,
        job: &DeliveryJob,
        payload: &DecodedPayload,
        claimed_at: Instant,
    ) -> Result<(), DeliveryError> {
        let method = self
            .store
            .delivery_method(job.tenant_id, job.delivery_method_id)
            .await
            .map_err(|e| match e {
                StoreError::NotFound { .. } => DeliveryError::Permanent(e.to_string()),
                other => DeliveryError::Transient(format!("delivery method lookup failed: {other}")),
            })?;
        let channel = method.channel()?;

        let time_limit = self
            .settings
            .delivery_window()
            .saturating_sub(claimed_at.elapsed());
        if time_limit.is_zero() {
            return Err(DeliveryError::Transient(
                "claim lease too short to attempt delivery".to_string(),
            ));
        }

        info!(
            job_id = %job.id,
            tenant_id = %job.tenant_id,
            attempt = job.attempts,
            channel = channel.as_str(),
            time_limit_ms = time_limit.as_millis() as u64,
            "delivery_dispatching"
        );

        let sent_at = Utc::now();

        self.dispatcher
            .dispatch(
                channel,
                &Delivery {
                    job,
                    method: &method,
                    payload,
                    filename: export_filename(sent_at),
                    sent_at,
                    time_limit,
                },
            )
            .await
    }
}
