//! Job payload decoding.
//!
//! ```text
//! raw payload bytes → decode_payload() → DecodedPayload → ExportSchema
//! ```
//!
//! Decoding is total: a payload either yields a fully-typed
//! [`DecodedPayload`] or a [`DeliveryError::Validation`]. Only a malformed
//! document or a missing/non-list `leads` member fails a job; every other
//! member falls back to a default.

pub mod lead;
pub mod schema;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::DeliveryError;

pub use lead::{LeadRecord, Question};
pub use schema::{BaseColumn, Column, ExportSchema, BASE_COLUMNS};

/// Wire shape of a delivery job payload.
#[derive(Debug, Deserialize)]
struct JobPayload {
    leads: Vec<LeadRecord>,
    #[serde(default, deserialize_with = "lead::questions")]
    questions: Vec<Question>,
    #[serde(default, deserialize_with = "lead::text")]
    recipient_email: String,
    #[serde(default, deserialize_with = "lead::text")]
    campaign_id: String,
    #[serde(default, deserialize_with = "lead_total")]
    total_leads: Option<u64>,
}

fn lead_total<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| f as u64)
        }),
        _ => None,
    })
}

/// A job payload after decoding.
#[derive(Debug, Clone)]
pub struct DecodedPayload {
    /// Leads in payload order.
    pub leads: Vec<LeadRecord>,
    /// Questions in payload order; see [`ExportSchema`] for column order.
    pub questions: Vec<Question>,
    pub recipient_email: Option<String>,
    /// Campaign whose delivered counter is incremented on success.
    pub campaign_id: Option<Uuid>,
    /// `total_leads` when present, otherwise the number of leads.
    pub total_leads: u64,
}

impl DecodedPayload {
    pub fn schema(&self) -> ExportSchema {
        ExportSchema::new(&self.questions)
    }
}

/// Decode a raw job payload.
pub fn decode_payload(raw: &[u8]) -> Result<DecodedPayload, DeliveryError> {
    let payload: JobPayload = serde_json::from_slice(raw)
        .map_err(|e| DeliveryError::Validation(e.to_string()))?;

    let recipient_email = Some(payload.recipient_email.trim().to_string())
        .filter(|email| !email.is_empty());

    let campaign_id = match payload.campaign_id.trim() {
        "" => None,
        raw_id => match Uuid::parse_str(raw_id) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(campaign_id = %raw_id, error = %e, "payload_campaign_id_invalid");
                None
            }
        },
    };

    let total_leads = payload
        .total_leads
        .unwrap_or(payload.leads.len() as u64);

    info!(
        lead_count = payload.leads.len(),
        question_count = payload.questions.len(),
        has_recipient = recipient_email.is_some(),
        has_campaign = campaign_id.is_some(),
        total_leads = total_leads,
        "payload_decoded"
    );

    Ok(DecodedPayload {
        leads: payload.leads,
        questions: payload.questions,
        recipient_email,
        campaign_id,
        total_leads,
    })
}
