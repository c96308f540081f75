//! Recipient suppression checks for the email channel.
//!
//! A recipient is suppressed when the provider lists it, or when the local
//! ledger holds a hard bounce or a complaint for it. The provider is asked
//! first and its reason wins. Lookup failures are logged and, under the
//! default fail-open policy, treated as "not suppressed".

use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use crate::provider::SuppressionProvider;
use crate::store::BounceLedger;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuppressionReason {
    /// Listed by the email provider; carries the provider's list reason.
    Provider(String),
    PreviousBounce,
    PreviousComplaint,
    /// A lookup failed and the gate is configured to fail closed.
    CheckUnavailable,
}

impl fmt::Display for SuppressionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuppressionReason::Provider(reason) => write!(f, "provider_{reason}"),
            SuppressionReason::PreviousBounce => f.write_str("previous_bounce"),
            SuppressionReason::PreviousComplaint => f.write_str("previous_complaint"),
            SuppressionReason::CheckUnavailable => f.write_str("suppression_check_unavailable"),
        }
    }
}

#[derive(Clone)]
pub struct SuppressionGate {
    provider: Option<Arc<dyn SuppressionProvider>>,
    ledger: Arc<dyn BounceLedger>,
    fail_open: bool,
}

impl SuppressionGate {
    pub fn new(
        provider: Option<Arc<dyn SuppressionProvider>>,
        ledger: Arc<dyn BounceLedger>,
        fail_open: bool,
    ) -> Self {
        Self {
            provider,
            ledger,
            fail_open,
        }
    }

    /// `Some(reason)` when `email` must not be contacted.
    pub async fn check(&self, email: &str) -> Option<SuppressionReason> {
        let email = email.trim().to_ascii_lowercase();
        let mut lookup_failed = false;

        if let Some(provider) = &self.provider {
            match provider.lookup(&email).await {
                Ok(Some(reason)) => return Some(SuppressionReason::Provider(reason)),
                Ok(None) => {}
                Err(e) => {
                    warn!(email = %email, source = "provider", error = %e, "suppression_check_failed");
                    lookup_failed = true;
                }
            }
        }

        match self.ledger.hard_bounce_count(&email).await {
            Ok(count) if count > 0 => return Some(SuppressionReason::PreviousBounce),
            Ok(_) => {}
            Err(e) => {
                warn!(email = %email, source = "bounces", error = %e, "suppression_check_failed");
                lookup_failed = true;
            }
        }

        match self.ledger.complaint_count(&email).await {
            Ok(count) if count > 0 => return Some(SuppressionReason::PreviousComplaint),
            Ok(_) => {}
            Err(e) => {
                warn!(email = %email, source = "complaints", error = %e, "suppression_check_failed");
                lookup_failed = true;
            }
        }

        if lookup_failed && !self.fail_open {
            info!(email = %email, "suppression_check_failed_closed");
            return Some(SuppressionReason::CheckUnavailable);
        }

        None
    }

    /// Tuple form of [`SuppressionGate::check`].
    pub async fn is_suppressed(&self, email: &str) -> (bool, Option<SuppressionReason>) {
        let reason = self.check(email).await;
        (reason.is_some(), reason)
    }
}
