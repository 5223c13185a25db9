//! sluice — ingestion, retry worker and request-log maintenance.

mod cli;
mod sources;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use sluice_core::Config;
use sluice_loader::{EventLoader, InboxRetryWorker, Stores};
use sluice_store::{db, PgStore, PruneOptions, RequestLog};

use crate::cli::{Cli, Command, PruneArgs, RequestLogCommand};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Usage errors exit with 2 here.
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("command failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    sluice_core::config::load_dotenv();
    let config = Config::for_profile(cli.profile.as_deref().unwrap_or_default())
        .context("invalid configuration")?;
    config.log_summary();

    let pool = db::connect(&config.postgres)
        .await
        .context("failed to connect to PostgreSQL")?;
    let store = PgStore::new(pool);

    match cli.command {
        Command::Migrate => {
            db::migrate(store.pool()).await?;
        }
        Command::Ingest { once } => {
            let sources = sources::build_sources(&config)?;
            let loader = EventLoader::new(sources, &Stores::from_backend(store), config.loader);
            if once {
                let did_work = loader.run_pass().await;
                info!(did_work, "ingest pass finished");
            } else {
                stop_on_signal(loader.cancellation_token());
                loader.run().await;
            }
        }
        Command::RetryWorker { once } => {
            let worker = InboxRetryWorker::new(&Stores::from_backend(store), config.retry);
            if once {
                let did_work = worker.run_once().await;
                info!(did_work, "retry pass finished");
            } else {
                stop_on_signal(worker.cancellation_token());
                worker.run().await;
            }
        }
        Command::RequestLog(RequestLogCommand::Prune(PruneArgs {
            succeeded_days,
            failed_days,
            archive,
        })) => {
            let report = store
                .prune_request_log(PruneOptions {
                    succeeded_days,
                    failed_days,
                    archive,
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::RequestLog(RequestLogCommand::ClearFailed { source, after_id }) => {
            let cleared = store.clear_failed(&source, after_id).await?;
            info!(source = %source, ?after_id, cleared, "failed reservations cleared");
        }
    }

    Ok(())
}

/// Cancel `token` on SIGINT or SIGTERM.
fn stop_on_signal(token: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received, finishing current work");
        token.cancel();
    });
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to register SIGTERM handler");
                if let Err(e) = ctrl_c.await {
                    warn!(error = %e, "failed to listen for ctrl_c");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = ctrl_c.await {
            warn!(error = %e, "failed to listen for ctrl_c");
        }
    }
}
