//! Email provider integration.
//!
//! The pipeline needs two things from the provider: sending a raw MIME
//! message, and asking whether a recipient is on the provider's suppression
//! lists. Both are traits so the pipeline can be driven with fakes.

pub mod mailgun;

use async_trait::async_trait;
use thiserror::Error;

pub use mailgun::{MailgunClient, MailgunSettings};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid provider url: {0}")]
    Url(String),
}

impl ProviderError {
    /// Whether a later attempt could succeed. Rate limiting, 5xx responses
    /// and transport failures are retryable; other 4xx responses are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Http(e) => !e.is_builder(),
            ProviderError::Status { status, .. } => *status == 429 || *status >= 500,
            ProviderError::Url(_) => false,
        }
    }
}

/// Sends fully-formed MIME messages.
#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send_raw(&self, from: &str, to: &str, message: Vec<u8>) -> Result<(), ProviderError>;
}

/// Provider-level suppression list.
#[async_trait]
pub trait SuppressionProvider: Send + Sync {
    /// `Ok(Some(reason))` when the address is suppressed, `Ok(None)` when the
    /// provider has no record of it.
    async fn lookup(&self, email: &str) -> Result<Option<String>, ProviderError>;
}
