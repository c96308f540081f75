//! Delivery channels.
//!
//! ```text
//! Delivery ─┬─ MethodType::Email → EmailChannel (suppression gate → MIME → provider)
//!           └─ MethodType::Api   → ApiChannel   (multipart upload → buyer endpoint)
//! ```
//!
//! Each channel returns `Ok(())` or a classified [`DeliveryError`].

pub mod api;
pub mod email;

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::DeliveryError;
use crate::model::{DeliveryJob, DeliveryMethod, MethodType};
use crate::payload::DecodedPayload;
use crate::render::render_csv;

pub use api::{ApiChannel, ApiDeliveryConfig, AuthType};
pub use email::{build_message, EmailChannel, EmailSettings, MessageParts};

/// Everything a channel needs to deliver one job.
#[derive(Debug)]
pub struct Delivery<'a> {
    pub job: &'a DeliveryJob,
    pub method: &'a DeliveryMethod,
    pub payload: &'a DecodedPayload,
    pub filename: String,
    pub sent_at: DateTime<Utc>,
    /// Upper bound for any network call made for this delivery; keeps the
    /// attempt inside the job's claim lease.
    pub time_limit: Duration,
}

impl Delivery<'_> {
    /// Render the CSV export. Channels call this only once their own
    /// preconditions hold.
    pub fn render_csv(&self) -> Result<Vec<u8>, DeliveryError> {
        render_csv(&self.payload.leads, &self.payload.schema())
    }
}

/// Attachment name for an export produced at `at`.
pub fn export_filename(at: DateTime<Utc>) -> String {
    format!("leads_{}.csv", at.format("%Y%m%d_%H%M%S"))
}

pub struct Dispatcher {
    email: Option<EmailChannel>,
    api: ApiChannel,
}

impl Dispatcher {
    /// `email` is `None` when no email provider is configured; email jobs
    /// then fail permanently.
    pub fn new(email: Option<EmailChannel>, api: ApiChannel) -> Self {
        Self { email, api }
    }

    pub async fn dispatch(
        &self,
        channel: MethodType,
        delivery: &Delivery<'_>,
    ) -> Result<(), DeliveryError> {
        let attempt = async {
            match channel {
                MethodType::Email => match &self.email {
                    Some(email) => email.deliver(delivery).await,
                    None => Err(DeliveryError::Permanent(
                        "email channel is not configured".to_string(),
                    )),
                },
                MethodType::Api => self.api.deliver(delivery).await,
            }
        };

        // Abandon the attempt before the claim lease can lapse.
        match tokio::time::timeout(delivery.time_limit, attempt).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    job_id = %delivery.job.id,
                    channel = channel.as_str(),
                    time_limit_ms = delivery.time_limit.as_millis() as u64,
                    "delivery_time_limit_exceeded"
                );
                Err(DeliveryError::Transient(format!(
                    "{} delivery exceeded its time limit of {:?}",
                    channel.as_str(),
                    delivery.time_limit
                )))
            }
        }
    }
}
