//! Outcome classification.
//!
//! | Outcome                          | attempts < max | attempts >= max |
//! |----------------------------------|----------------|-----------------|
//! | success                          | success        | success         |
//! | permanent / suppressed / invalid | failed         | failed          |
//! | transient                        | pending        | failed          |
//!
//! History mirrors the job status, except that a retry is recorded as
//! `retry_scheduled` and a suppression as `suppressed`.

use crate::error::DeliveryError;
use crate::model::{HistoryStatus, JobStatus};

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Result of classifying one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub job_status: JobStatus,
    pub history_status: HistoryStatus,
    pub last_error: Option<String>,
}

/// `attempts` is the counter after this attempt's increment.
pub fn classify(
    outcome: &Result<(), DeliveryError>,
    attempts: u32,
    max_retries: u32,
) -> Transition {
    let error = match outcome {
        Ok(()) => {
            return Transition {
                job_status: JobStatus::Success,
                history_status: HistoryStatus::Success,
                last_error: None,
            }
        }
        Err(e) => e,
    };

    let (job_status, history_status) = match error {
        DeliveryError::Suppressed { .. } => (JobStatus::Failed, HistoryStatus::Suppressed),
        e if e.is_retryable() && attempts < max_retries => {
            (JobStatus::Pending, HistoryStatus::RetryScheduled)
        }
        _ => (JobStatus::Failed, HistoryStatus::Failed),
    };

    Transition {
        job_status,
        history_status,
        last_error: Some(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suppression::SuppressionReason;

    fn transient() -> Result<(), DeliveryError> {
        Err(DeliveryError::Transient("api returned status 503".into()))
    }

    #[test]
    fn test_success_at_any_attempt() {
        for attempts in [1, 3, 7] {
            let t = classify(&Ok(()), attempts, DEFAULT_MAX_RETRIES);
            assert_eq!(t.job_status, JobStatus::Success);
            assert_eq!(t.history_status, HistoryStatus::Success);
            assert_eq!(t.last_error, None);
        }
    }

    #[test]
    fn test_transient_below_limit_is_retried() {
        let t = classify(&transient(), 1, DEFAULT_MAX_RETRIES);
        assert_eq!(t.job_status, JobStatus::Pending);
        assert_eq!(t.history_status, HistoryStatus::RetryScheduled);
        assert!(t.last_error.unwrap().contains("503"));

        let t = classify(&transient(), 2, DEFAULT_MAX_RETRIES);
        assert_eq!(t.job_status, JobStatus::Pending);
    }

    #[test]
    fn test_transient_at_limit_fails() {
        let t = classify(&transient(), 3, DEFAULT_MAX_RETRIES);
        assert_eq!(t.job_status, JobStatus::Failed);
        assert_eq!(t.history_status, HistoryStatus::Failed);

        let t = classify(&transient(), 4, DEFAULT_MAX_RETRIES);
        assert_eq!(t.job_status, JobStatus::Failed);
    }

    #[test]
    fn test_suppression_fails_with_suppressed_history() {
        for attempts in [1, 3] {
            let t = classify(
                &Err(DeliveryError::Suppressed {
                    reason: SuppressionReason::PreviousBounce,
                }),
                attempts,
                DEFAULT_MAX_RETRIES,
            );
            assert_eq!(t.job_status, JobStatus::Failed);
            assert_eq!(t.history_status, HistoryStatus::Suppressed);
            assert!(t.last_error.unwrap().contains("previous_bounce"));
        }
    }

    #[test]
    fn test_permanent_and_validation_fail_immediately() {
        for error in [
            DeliveryError::Permanent("api returned status 400".into()),
            DeliveryError::Validation("leads is not a list".into()),
        ] {
            let t = classify(&Err(error), 1, DEFAULT_MAX_RETRIES);
            assert_eq!(t.job_status, JobStatus::Failed);
            assert_eq!(t.history_status, HistoryStatus::Failed);
        }
    }
}
