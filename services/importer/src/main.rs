mod connector;
mod health;
mod http;
mod mailchimp;
mod models;
mod ometria;
mod runner;
mod scheduler;

use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use listsync_common::error::ListsyncError;
use listsync_common::types::InstanceInfo;
use listsync_config::{init_tracing, AppConfig, RunMode};
use listsync_state::DiskWatermarkStore;

use crate::mailchimp::client::{MailchimpClient, MailchimpClientConfig};
use crate::ometria::client::{OmetriaClient, OmetriaClientConfig};
use crate::runner::JobRunner;
use crate::scheduler::Scheduler;

const SERVICE_NAME: &str = "listsync-importer";

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    init_tracing("info");

    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!(error = %e, "importer failed to start (fail-fast)");
            ExitCode::FAILURE
        }
    }
}

/// Wire the components and run in the configured mode.
///
/// Returns whether every job of the final cycle succeeded (always `true` in
/// daemon mode). Everything is dropped before returning, which releases the
/// state directory lock.
async fn run() -> Result<bool, ListsyncError> {
    let config = AppConfig::from_env()?;
    let mailchimp_config = MailchimpClientConfig::from_env()?;
    let ometria_config = OmetriaClientConfig::from_env()?;

    tracing::info!(
        service = SERVICE_NAME,
        mode = %config.mode,
        jobs = ?config.job_ids,
        log_level = %config.log_level,
        "starting"
    );

    let source = MailchimpClient::new(mailchimp_config)
        .map_err(|e| ListsyncError::Config(format!("failed to create mailchimp client: {e}")))?;
    tracing::info!(page_limit = source.config().page_limit, "mailchimp client initialised");

    let sink = OmetriaClient::new(ometria_config)
        .map_err(|e| ListsyncError::Config(format!("failed to create ometria client: {e}")))?;
    tracing::info!(
        batch_size = sink.config().batch_size,
        concurrency = sink.config().concurrency,
        "ometria client initialised"
    );

    let store = DiskWatermarkStore::open(&config.state_dir)?;

    let runner = JobRunner::new(source, sink, store);
    let scheduler = Scheduler::new(
        runner,
        config.job_ids.clone(),
        Duration::from_secs(config.period_secs),
    );
    tracing::info!(jobs = scheduler.job_ids().len(), "scheduler initialised");

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    match config.mode {
        RunMode::Once => {
            let report = scheduler.run_once(&cancel).await;
            Ok(report.is_success())
        }
        RunMode::Daemon => {
            let health = match config.health_addr.as_deref() {
                Some(addr) => {
                    let addr: SocketAddr = addr.parse().map_err(|e| {
                        ListsyncError::Config(format!("invalid IMPORTER_HEALTH_ADDR '{addr}': {e}"))
                    })?;
                    let listener = health::bind(addr).await.map_err(|e| {
                        ListsyncError::Config(format!("cannot bind IMPORTER_HEALTH_ADDR {addr}: {e}"))
                    })?;
                    let instance = InstanceInfo::new(SERVICE_NAME, config.mode)
                        .with_schedule(&config.job_ids, config.period_secs);
                    let cancel = cancel.clone();
                    Some(tokio::spawn(async move {
                        if let Err(e) = health::serve(listener, instance, cancel.clone()).await {
                            tracing::error!(error = %e, "health endpoint failed, stopping");
                            cancel.cancel();
                        }
                    }))
                }
                None => None,
            };

            scheduler.run(&cancel).await;

            if let Some(handle) = health {
                if let Err(e) = handle.await {
                    tracing::error!(error = %e, "health endpoint task panicked");
                }
            }
            tracing::info!("shutting down");
            Ok(true)
        }
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = cancel.cancelled() => return,
    }

    tracing::info!("shutdown signal received");
    cancel.cancel();
}
