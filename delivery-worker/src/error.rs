//! Error taxonomy for the delivery pipeline.
//!
//! Channel and payload failures are [`DeliveryError`]s: they never leave the
//! per-job boundary and are turned into a status transition by the
//! classifier. Job-store failures are [`StoreError`]s and are surfaced to the
//! invocation caller.

use thiserror::Error;
use uuid::Uuid;

use crate::suppression::SuppressionReason;

/// Outcome of a failed delivery attempt.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The job payload could not be decoded. Never retried.
    #[error("invalid job payload: {0}")]
    Validation(String),

    /// The recipient is on a suppression list. Never retried.
    #[error("email address is suppressed: {reason}")]
    Suppressed { reason: SuppressionReason },

    /// Bad configuration or a 4xx response from the channel. Never retried.
    #[error("permanent delivery failure: {0}")]
    Permanent(String),

    /// Network failure, timeout or 5xx response. Retried up to the limit.
    #[error("delivery failed: {0}")]
    Transient(String),
}

impl DeliveryError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::Transient(_))
    }

    /// Short label used in log events.
    pub fn kind(&self) -> &'static str {
        match self {
            DeliveryError::Validation(_) => "validation",
            DeliveryError::Suppressed { .. } => "suppressed",
            DeliveryError::Permanent(_) => "permanent",
            DeliveryError::Transient(_) => "transient",
        }
    }
}

/// Failure of the job store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    /// The job's lease was taken over or released by another invocation.
    #[error("lost claim on delivery job {0}")]
    LostClaim(Uuid),

    #[error("job store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        StoreError::NotFound { entity, id }
    }
}
