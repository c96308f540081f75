//! LeadShip delivery worker.
//!
//! Runs the delivery pipeline against the Postgres job store. With
//! `POLL_INTERVAL_SECS` unset it performs one invocation and exits, which is
//! how the scheduler triggers it. With an interval set it keeps invoking until
//! SIGINT/SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use tokio::signal;
use tokio::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use leadship::dispatch::{ApiChannel, Dispatcher, EmailChannel};
use leadship::provider::{EmailTransport, MailgunClient, SuppressionProvider};
use leadship::store::{BounceLedger, JobStore, PgStore};
use leadship::{Config, Pipeline, SuppressionGate};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("worker_starting");

    let config = Config::from_env();
    info!(
        tenant_id = ?config.tenant_id,
        batch_limit = config.job_batch_limit,
        max_retries = config.max_retries,
        concurrency = config.worker_concurrency,
        invocation_budget_secs = config.invocation_budget_secs,
        poll_interval_secs = ?config.poll_interval_secs,
        email_enabled = config.mailgun_settings().is_some(),
        suppression_fail_open = config.suppression_fail_open,
        "config_loaded"
    );

    let store = Arc::new(
        PgStore::connect(&config.database_url, config.database_max_connections)
            .await
            .context("Failed to connect to job store")?,
    );
    info!("job_store_connected");

    let pipeline = build_pipeline(&config, store.clone())?;

    let clean = match config.poll_interval() {
        None => invoke(&pipeline, config.invocation_budget()).await?,
        Some(interval) => poll(&pipeline, config.invocation_budget(), interval).await,
    };

    store.close().await;
    info!("worker_shutdown_complete");

    if !clean {
        anyhow::bail!("invocation finished with persistence failures");
    }
    Ok(())
}

fn build_pipeline(config: &Config, store: Arc<PgStore>) -> Result<Pipeline> {
    let http = Client::builder()
        .user_agent(concat!("leadship-delivery/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("Failed to build HTTP client")?;

    let email = match config.mailgun_settings() {
        Some(settings) => {
            let mailgun = Arc::new(
                MailgunClient::new(http.clone(), &settings)
                    .context("Invalid email provider configuration")?,
            );
            let gate = SuppressionGate::new(
                Some(mailgun.clone() as Arc<dyn SuppressionProvider>),
                store.clone() as Arc<dyn BounceLedger>,
                config.suppression_fail_open,
            );
            Some(EmailChannel::new(
                mailgun as Arc<dyn EmailTransport>,
                gate,
                config.email_settings(),
            ))
        }
        None => {
            warn!("email_channel_disabled");
            None
        }
    };

    let dispatcher = Dispatcher::new(email, ApiChannel::new(http));
    Ok(Pipeline::new(
        store as Arc<dyn JobStore>,
        Arc::new(dispatcher),
        config.pipeline_settings(),
    ))
}

/// Run one invocation. Returns whether every job was recorded.
async fn invoke(pipeline: &Pipeline, budget: Duration) -> Result<bool> {
    let report = pipeline
        .run_invocation(Instant::now() + budget)
        .await
        .context("Failed to fetch due jobs")?;
    Ok(report.persistence_failures == 0)
}

/// Invoke on `interval` until shutdown. Failed invocations are logged and
/// retried on the next tick.
async fn poll(pipeline: &Pipeline, budget: Duration, interval: Duration) -> bool {
    // Create shutdown signal future
    let shutdown = async {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT"),
            _ = terminate => info!("Received SIGTERM"),
        }
    };
    tokio::pin!(shutdown);

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut clean = true;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("worker_stopping");
                break;
            }
            _ = ticker.tick() => {
                match invoke(pipeline, budget).await {
                    Ok(true) => {}
                    Ok(false) => clean = false,
                    Err(e) => {
                        error!(error = %format!("{e:#}"), "invocation_failed");
                        clean = false;
                    }
                }
            }
        }
    }

    clean
}
