//! Applies a classified outcome to the job store.
//!
//! Writes happen in a fixed order: job status, delivery status, campaign
//! counter, history. The job status and history writes are required; the
//! delivery and campaign writes are best-effort and only logged on failure,
//! so the job status always reflects what actually happened.

use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::classify::Transition;
use crate::error::StoreError;
use crate::model::{DeliveryJob, HistoryEntry, JobStatus};
use crate::store::JobStore;

/// Campaign credit for a successful delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CampaignCredit {
    pub campaign_id: Uuid,
    pub total_leads: u64,
}

#[derive(Clone)]
pub struct JobStateManager {
    store: Arc<dyn JobStore>,
}

impl JobStateManager {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    pub async fn record(
        &self,
        job: &DeliveryJob,
        transition: &Transition,
        credit: Option<CampaignCredit>,
    ) -> Result<(), StoreError> {
        let last_error = transition.last_error.as_deref();

        self.store
            .update_job_status(job, transition.job_status, last_error)
            .await?;

        if let Some(delivery_id) = job.delivery_id {
            if let Err(e) = self
                .store
                .update_delivery_status(job.tenant_id, delivery_id, transition.job_status)
                .await
            {
                warn!(
                    job_id = %job.id,
                    tenant_id = %job.tenant_id,
                    attempt = job.attempts,
                    delivery_id = %delivery_id,
                    error = %e,
                    "delivery_status_update_failed"
                );
            }
        }

        if transition.job_status == JobStatus::Success {
            if let Some(credit) = credit.filter(|c| c.total_leads > 0) {
                if let Err(e) = self
                    .store
                    .increment_campaign_delivered(job.tenant_id, credit.campaign_id, credit.total_leads)
                    .await
                {
                    warn!(
                        job_id = %job.id,
                        tenant_id = %job.tenant_id,
                        attempt = job.attempts,
                        campaign_id = %credit.campaign_id,
                        total_leads = credit.total_leads,
                        error = %e,
                        "campaign_increment_failed"
                    );
                }
            }
        }

        self.store
            .append_history(&HistoryEntry {
                tenant_id: job.tenant_id,
                job_id: job.id,
                attempt: job.attempts,
                buyer_id: job.buyer_id,
                delivery_method_id: job.delivery_method_id,
                status: transition.history_status,
                error_message: transition.last_error.clone(),
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HistoryStatus;
    use crate::store::{MemoryStore, StoreOp};
    use chrono::Utc;
    use std::time::Duration;

    async fn claimed(store: &MemoryStore, delivery_id: Option<Uuid>) -> DeliveryJob {
        let job = DeliveryJob {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            campaign_id: None,
            buyer_id: Uuid::new_v4(),
            delivery_method_id: Uuid::new_v4(),
            delivery_id,
            payload: Vec::new(),
            status: JobStatus::Pending,
            attempts: 0,
            last_error: None,
            due_at: Utc::now(),
            lease_token: None,
        };
        if let Some(delivery_id) = delivery_id {
            store.insert_delivery(job.tenant_id, delivery_id);
        }
        store.insert_job(job.clone());
        store
            .claim_job(&job, Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap()
    }

    fn success() -> Transition {
        Transition {
            job_status: JobStatus::Success,
            history_status: HistoryStatus::Success,
            last_error: None,
        }
    }

    #[tokio::test]
    async fn test_success_updates_everything() {
        let store = Arc::new(MemoryStore::new());
        let job = claimed(&store, Some(Uuid::new_v4())).await;
        let campaign_id = Uuid::new_v4();
        store.insert_campaign(job.tenant_id, campaign_id);

        JobStateManager::new(store.clone())
            .record(
                &job,
                &success(),
                Some(CampaignCredit {
                    campaign_id,
                    total_leads: 12,
                }),
            )
            .await
            .unwrap();

        let stored = store.job(job.id).unwrap();
        assert_eq!(stored.status, JobStatus::Success);
        assert_eq!(stored.lease_token, None);
        assert_eq!(
            store.delivery_status(job.tenant_id, job.delivery_id.unwrap()),
            Some(JobStatus::Success)
        );
        assert_eq!(store.campaign_delivered(job.tenant_id, campaign_id), Some(12));

        let history = store.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].attempt, 1);
        assert_eq!(history[0].status, HistoryStatus::Success);
    }

    #[tokio::test]
    async fn test_retry_does_not_credit_campaign() {
        let store = Arc::new(MemoryStore::new());
        let job = claimed(&store, None).await;
        let campaign_id = Uuid::new_v4();
        store.insert_campaign(job.tenant_id, campaign_id);

        let transition = Transition {
            job_status: JobStatus::Pending,
            history_status: HistoryStatus::RetryScheduled,
            last_error: Some("delivery failed: timeout".to_string()),
        };
        JobStateManager::new(store.clone())
            .record(
                &job,
                &transition,
                Some(CampaignCredit {
                    campaign_id,
                    total_leads: 5,
                }),
            )
            .await
            .unwrap();

        let stored = store.job(job.id).unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
        assert_eq!(stored.last_error.as_deref(), Some("delivery failed: timeout"));
        assert_eq!(store.campaign_delivered(job.tenant_id, campaign_id), Some(0));
        assert_eq!(store.history()[0].status, HistoryStatus::RetryScheduled);
    }

    #[tokio::test]
    async fn test_best_effort_failures_do_not_revert_status() {
        let store = Arc::new(MemoryStore::new());
        let job = claimed(&store, Some(Uuid::new_v4())).await;
        store.fail_on(StoreOp::UpdateDeliveryStatus);
        store.fail_on(StoreOp::IncrementCampaign);

        JobStateManager::new(store.clone())
            .record(
                &job,
                &success(),
                Some(CampaignCredit {
                    campaign_id: Uuid::new_v4(),
                    total_leads: 3,
                }),
            )
            .await
            .unwrap();

        assert_eq!(store.job(job.id).unwrap().status, JobStatus::Success);
        assert_eq!(store.history().len(), 1);
    }

    #[tokio::test]
    async fn test_job_status_failure_is_propagated() {
        let store = Arc::new(MemoryStore::new());
        let job = claimed(&store, None).await;
        store.fail_on(StoreOp::UpdateJobStatus);

        let result = JobStateManager::new(store.clone())
            .record(&job, &success(), None)
            .await;

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert!(store.history().is_empty());
    }

    #[tokio::test]
    async fn test_stale_lease_is_lost_claim() {
        let store = Arc::new(MemoryStore::new());
        let mut job = claimed(&store, None).await;
        job.lease_token = Some(Uuid::new_v4());

        let result = JobStateManager::new(store.clone())
            .record(&job, &success(), None)
            .await;

        assert!(matches!(result, Err(StoreError::LostClaim(id)) if id == job.id));
        assert_eq!(store.job(job.id).unwrap().status, JobStatus::Pending);
    }
}
