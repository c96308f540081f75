//! Configuration module for environment variable parsing.
//!
//! Every setting has a default, so the worker starts with an empty
//! environment against a local database. Unparseable values fall back to the
//! default with a warning.

use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;
use uuid::Uuid;

use crate::classify::DEFAULT_MAX_RETRIES;
use crate::dispatch::EmailSettings;
use crate::model::JobScope;
use crate::pipeline::PipelineSettings;
use crate::provider::MailgunSettings;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Job Store
    // =========================================================================
    /// Postgres connection string
    pub database_url: String,

    /// Maximum pool connections
    pub database_max_connections: u32,

    // =========================================================================
    // Invocation
    // =========================================================================
    /// Maximum due jobs fetched per invocation
    pub job_batch_limit: usize,

    /// Restrict invocations to one tenant; `None` processes all tenants
    pub tenant_id: Option<Uuid>,

    /// Attempts after which a transient failure becomes final
    pub max_retries: u32,

    /// Jobs processed concurrently within an invocation
    pub worker_concurrency: usize,

    /// How long a claim protects a job from other invocations
    pub job_lease_secs: u64,

    /// Execution budget of one invocation
    pub invocation_budget_secs: u64,

    /// Re-invoke on this interval; `None` runs once and exits
    pub poll_interval_secs: Option<u64>,

    // =========================================================================
    // Email
    // =========================================================================
    pub email_from: String,

    pub email_subject: String,

    pub mailgun_api_base: String,

    pub mailgun_api_key: Option<String>,

    pub mailgun_domain: Option<String>,

    /// Timeout for provider sends and suppression lookups
    pub provider_timeout_ms: u64,

    /// Send anyway when a suppression lookup fails
    pub suppression_fail_open: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Config {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost:5432/leadship".to_string()),

            database_max_connections: parse_var("DATABASE_MAX_CONNECTIONS", 25),

            job_batch_limit: parse_var("JOB_BATCH_LIMIT", 50),

            tenant_id: parse_optional("TENANT_ID"),

            max_retries: parse_var("MAX_RETRIES", DEFAULT_MAX_RETRIES),

            worker_concurrency: parse_var("WORKER_CONCURRENCY", 1),

            job_lease_secs: parse_var("JOB_LEASE_SECS", 600),

            invocation_budget_secs: parse_var("INVOCATION_BUDGET_SECS", 300),

            poll_interval_secs: parse_optional("POLL_INTERVAL_SECS"),

            email_from: env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "notifications@lead-ship.app".to_string()),

            email_subject: env::var("EMAIL_SUBJECT")
                .unwrap_or_else(|_| "New Lead Delivery".to_string()),

            mailgun_api_base: env::var("MAILGUN_API_BASE")
                .unwrap_or_else(|_| "https://api.mailgun.net".to_string()),

            mailgun_api_key: non_empty("MAILGUN_API_KEY"),

            mailgun_domain: non_empty("MAILGUN_DOMAIN"),

            provider_timeout_ms: parse_var("PROVIDER_TIMEOUT_MS", 10_000),

            suppression_fail_open: parse_bool("SUPPRESSION_FAIL_OPEN", true),
        }
    }

    pub fn scope(&self) -> JobScope {
        self.tenant_id.map_or(JobScope::Global, JobScope::Tenant)
    }

    pub fn invocation_budget(&self) -> Duration {
        Duration::from_secs(self.invocation_budget_secs)
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            scope: self.scope(),
            batch_limit: self.job_batch_limit.max(1),
            max_retries: self.max_retries.max(1),
            concurrency: self.worker_concurrency.max(1),
            lease: Duration::from_secs(self.job_lease_secs),
        }
    }

    pub fn email_settings(&self) -> EmailSettings {
        EmailSettings {
            from: self.email_from.clone(),
            subject: self.email_subject.clone(),
        }
    }

    /// Provider settings, when both the API key and the domain are set.
    pub fn mailgun_settings(&self) -> Option<MailgunSettings> {
        let api_key = self.mailgun_api_key.clone()?;
        let domain = self.mailgun_domain.clone()?;
        Some(MailgunSettings {
            api_base: self.mailgun_api_base.clone(),
            api_key,
            domain,
            timeout: Duration::from_millis(self.provider_timeout_ms),
        })
    }
}

/// Parse a variable, falling back to `default` when unset or invalid.
fn parse_var<T>(name: &str, default: T) -> T
where
    T: FromStr + Display,
{
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            warn!(env_var = name, value = %raw, default = %default, "Invalid value, using default");
            default
        }
    }
}

/// Parse an optional variable; invalid values are treated as unset.
fn parse_optional<T: FromStr>(name: &str) -> Option<T> {
    let raw = non_empty(name)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(env_var = name, value = %raw, "Invalid value, ignoring");
            None
        }
    }
}

fn parse_bool(name: &str, default: bool) -> bool {
    match non_empty(name).map(|v| v.to_ascii_lowercase()) {
        None => default,
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                warn!(env_var = name, value = %v, default = default, "Invalid boolean, using default");
                default
            }
        },
    }
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
