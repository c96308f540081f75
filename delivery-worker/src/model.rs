//! Records read and written by the delivery pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DeliveryError;

// =============================================================================
// Delivery Jobs
// =============================================================================

/// Status of a delivery job. `Success` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Success,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "success" => Ok(JobStatus::Success),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// One batch delivery to one buyer via one delivery method.
#[derive(Debug, Clone)]
pub struct DeliveryJob {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub campaign_id: Option<Uuid>,
    pub buyer_id: Uuid,
    pub delivery_method_id: Uuid,
    pub delivery_id: Option<Uuid>,
    /// Raw JSON payload; decoded by [`crate::payload::decode_payload`].
    pub payload: Vec<u8>,
    pub status: JobStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub due_at: DateTime<Utc>,
    /// Set while an invocation holds the job.
    pub lease_token: Option<Uuid>,
}

/// Which jobs an invocation may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobScope {
    Global,
    Tenant(Uuid),
}

// =============================================================================
// Delivery Methods
// =============================================================================

/// Delivery channel of a [`DeliveryMethod`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodType {
    Email,
    Api,
}

impl MethodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MethodType::Email => "email",
            MethodType::Api => "api",
        }
    }
}

/// A buyer's configured channel. Read-only to the pipeline.
#[derive(Debug, Clone)]
pub struct DeliveryMethod {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub buyer_id: Uuid,
    /// Stored verbatim so that unknown types surface as delivery failures.
    pub method_type: String,
    pub config: serde_json::Value,
    pub active: bool,
}

impl DeliveryMethod {
    /// Resolve the channel, rejecting inactive or unknown methods.
    pub fn channel(&self) -> Result<MethodType, DeliveryError> {
        if !self.active {
            return Err(DeliveryError::Permanent(format!(
                "delivery method {} is inactive",
                self.id
            )));
        }

        match self.method_type.trim().to_ascii_lowercase().as_str() {
            "email" => Ok(MethodType::Email),
            "api" => Ok(MethodType::Api),
            other => Err(DeliveryError::Permanent(format!(
                "unknown delivery method type: {other}"
            ))),
        }
    }
}

// =============================================================================
// History
// =============================================================================

/// Status label recorded in the delivery history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    Success,
    Failed,
    RetryScheduled,
    Suppressed,
}

impl HistoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryStatus::Success => "success",
            HistoryStatus::Failed => "failed",
            HistoryStatus::RetryScheduled => "retry_scheduled",
            HistoryStatus::Suppressed => "suppressed",
        }
    }
}

impl fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable audit record of one processing attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub tenant_id: Uuid,
    pub job_id: Uuid,
    /// Attempt number the entry belongs to; `(job_id, attempt)` is unique.
    pub attempt: u32,
    pub buyer_id: Uuid,
    pub delivery_method_id: Uuid,
    pub status: HistoryStatus,
    pub error_message: Option<String>,
}
