//! Mailgun client for raw message sends and suppression lookups.
//!
//! Sends go to `POST /v3/{domain}/messages.mime` with the MIME document as
//! the `message` part. Suppression lookups query the `bounces`, `complaints`
//! and `unsubscribes` lists in that order; a 404 means the address is not on
//! that list.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use tracing::{info, warn};
use url::Url;

use super::{EmailTransport, ProviderError, SuppressionProvider};

/// Lists consulted on lookup, paired with the reported reason.
const SUPPRESSION_LISTS: [(&str, &str); 3] = [
    ("bounces", "bounce"),
    ("complaints", "complaint"),
    ("unsubscribes", "unsubscribe"),
];

/// Maximum response body kept in error messages.
const ERROR_BODY_LIMIT: usize = 500;

#[derive(Debug, Clone)]
pub struct MailgunSettings {
    pub api_base: String,
    pub api_key: String,
    pub domain: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct MailgunClient {
    client: Client,
    api_base: Url,
    api_key: String,
    domain: String,
    timeout: Duration,
}

impl MailgunClient {
    pub fn new(client: Client, settings: &MailgunSettings) -> Result<Self, ProviderError> {
        let api_base = Url::parse(&settings.api_base)
            .map_err(|e| ProviderError::Url(format!("{}: {e}", settings.api_base)))?;
        if api_base.cannot_be_a_base() {
            return Err(ProviderError::Url(settings.api_base.clone()));
        }

        Ok(Self {
            client,
            api_base,
            api_key: settings.api_key.clone(),
            domain: settings.domain.clone(),
            timeout: settings.timeout,
        })
    }

    /// `{api_base}/v3/{domain}/{segments...}`, each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ProviderError> {
        let mut url = self.api_base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| ProviderError::Url(self.api_base.to_string()))?;
            path.pop_if_empty().push("v3").push(&self.domain).extend(segments);
        }
        Ok(url)
    }
}

async fn status_error(response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > ERROR_BODY_LIMIT {
        let mut cut = ERROR_BODY_LIMIT;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    ProviderError::Status { status, body }
}

#[async_trait]
impl EmailTransport for MailgunClient {
    async fn send_raw(&self, from: &str, to: &str, message: Vec<u8>) -> Result<(), ProviderError> {
        let url = self.endpoint(&["messages.mime"])?;
        let message_length = message.len();

        let form = Form::new()
            .text("from", from.to_string())
            .text("to", to.to_string())
            .part("message", Part::bytes(message).file_name("message.mime"));

        let response = self
            .client
            .post(url)
            .basic_auth("api", Some(&self.api_key))
            .timeout(self.timeout)
            .multipart(form)
            .send()
            .await?;

        if response.status().is_success() {
            info!(
                to = %to,
                message_length = message_length,
                status_code = response.status().as_u16(),
                "mailgun_message_accepted"
            );
            return Ok(());
        }

        let error = status_error(response).await;
        warn!(to = %to, error = %error, "mailgun_message_rejected");
        Err(error)
    }
}

#[async_trait]
impl SuppressionProvider for MailgunClient {
    async fn lookup(&self, email: &str) -> Result<Option<String>, ProviderError> {
        for (list, reason) in SUPPRESSION_LISTS {
            let url = self.endpoint(&[list, email])?;

            let response = self
                .client
                .get(url)
                .basic_auth("api", Some(&self.api_key))
                .timeout(self.timeout)
                .send()
                .await?;

            match response.status() {
                status if status.is_success() => {
                    info!(email = %email, list = list, "mailgun_suppression_found");
                    return Ok(Some(reason.to_string()));
                }
                StatusCode::NOT_FOUND => continue,
                _ => return Err(status_error(response).await),
            }
        }

        Ok(None)
    }
}
