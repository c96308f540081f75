//! Email channel: suppression check, MIME assembly, provider send.

use std::sync::Arc;

use base64::Engine;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use super::Delivery;
use crate::error::DeliveryError;
use crate::provider::EmailTransport;
use crate::suppression::SuppressionGate;

/// RFC 2045 line length for base64 bodies.
const BASE64_LINE_LENGTH: usize = 76;

#[derive(Debug, Clone)]
pub struct EmailSettings {
    pub from: String,
    pub subject: String,
}

pub struct EmailChannel {
    transport: Arc<dyn EmailTransport>,
    gate: SuppressionGate,
    settings: EmailSettings,
}

impl EmailChannel {
    pub fn new(
        transport: Arc<dyn EmailTransport>,
        gate: SuppressionGate,
        settings: EmailSettings,
    ) -> Self {
        Self {
            transport,
            gate,
            settings,
        }
    }

    pub async fn deliver(&self, delivery: &Delivery<'_>) -> Result<(), DeliveryError> {
        let job_id = delivery.job.id;
        let recipient = delivery.payload.recipient_email.as_deref().ok_or_else(|| {
            DeliveryError::Permanent("recipient email not found in job payload".to_string())
        })?;

        if let (true, Some(reason)) = self.gate.is_suppressed(recipient).await {
            info!(
                job_id = %job_id,
                recipient = %recipient,
                reason = %reason,
                "email_recipient_suppressed"
            );
            return Err(DeliveryError::Suppressed { reason });
        }

        let csv = delivery.render_csv()?;
        let lead_count = delivery.payload.leads.len();
        let message = build_message(&MessageParts {
            from: &self.settings.from,
            to: recipient,
            subject: &self.settings.subject,
            body: &format!("Please find attached {lead_count} leads in CSV format."),
            filename: &delivery.filename,
            attachment: &csv,
            boundary: &boundary_for(&job_id.to_string(), &delivery.filename),
            date: delivery.sent_at,
        });

        info!(
            job_id = %job_id,
            recipient = %recipient,
            lead_count = lead_count,
            message_length = message.len(),
            "email_delivery_sending"
        );

        match self
            .transport
            .send_raw(&self.settings.from, recipient, message)
            .await
        {
            Ok(()) => {
                info!(job_id = %job_id, recipient = %recipient, "email_delivery_sent");
                Ok(())
            }
            Err(e) if e.is_retryable() => {
                warn!(job_id = %job_id, error = %e, retryable = true, "email_delivery_failed");
                Err(DeliveryError::Transient(format!("email delivery failed: {e}")))
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, retryable = false, "email_delivery_failed");
                Err(DeliveryError::Permanent(format!("email delivery rejected: {e}")))
            }
        }
    }
}

/// Inputs of a lead-delivery message.
#[derive(Debug)]
pub struct MessageParts<'a> {
    pub from: &'a str,
    pub to: &'a str,
    pub subject: &'a str,
    pub body: &'a str,
    pub filename: &'a str,
    pub attachment: &'a [u8],
    pub boundary: &'a str,
    pub date: DateTime<Utc>,
}

/// Strip line breaks so values cannot inject headers.
fn header_value(value: &str) -> String {
    value.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}

fn boundary_for(job_id: &str, filename: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{job_id}-{filename}").as_bytes());
    let hash = hex::encode(hasher.finalize());
    format!("leadship-{}", &hash[..32])
}

/// Assemble a `multipart/mixed` message with a plain-text part and the CSV
/// as a base64 attachment.
pub fn build_message(parts: &MessageParts<'_>) -> Vec<u8> {
    let boundary = header_value(parts.boundary);
    let filename = header_value(parts.filename).replace('"', "");

    let encoded = base64::engine::general_purpose::STANDARD.encode(parts.attachment);
    let mut wrapped = String::with_capacity(encoded.len() + encoded.len() / BASE64_LINE_LENGTH * 2);
    for (i, chunk) in encoded.as_bytes().chunks(BASE64_LINE_LENGTH).enumerate() {
        if i > 0 {
            wrapped.push_str("\r\n");
        }
        // base64 output is ASCII
        wrapped.push_str(&String::from_utf8_lossy(chunk));
    }

    let mut message = String::new();
    message.push_str(&format!("From: {}\r\n", header_value(parts.from)));
    message.push_str(&format!("To: {}\r\n", header_value(parts.to)));
    message.push_str(&format!("Subject: {}\r\n", header_value(parts.subject)));
    message.push_str(&format!("Date: {}\r\n", parts.date.to_rfc2822()));
    message.push_str("MIME-Version: 1.0\r\n");
    message.push_str(&format!(
        "Content-Type: multipart/mixed; boundary=\"{boundary}\"\r\n\r\n"
    ));

    message.push_str(&format!("--{boundary}\r\n"));
    message.push_str("Content-Type: text/plain; charset=UTF-8\r\n");
    message.push_str("Content-Transfer-Encoding: 8bit\r\n\r\n");
    message.push_str(parts.body);
    message.push_str("\r\n\r\n");

    message.push_str(&format!("--{boundary}\r\n"));
    message.push_str(&format!("Content-Type: text/csv; name=\"{filename}\"\r\n"));
    message.push_str(&format!(
        "Content-Disposition: attachment; filename=\"{filename}\"\r\n"
    ));
    message.push_str("Content-Transfer-Encoding: base64\r\n\r\n");
    message.push_str(&wrapped);
    message.push_str(&format!("\r\n--{boundary}--\r\n"));

    message.into_bytes()
}
