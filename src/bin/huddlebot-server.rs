// ABOUTME: Main server binary - wires resources, starts workers, handles shutdown
// ABOUTME: Schedules the recurring credential audit and nightly cleanup at boot
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Huddlebot

//! # Huddlebot Server
//!
//! Long-running backend process for the Huddlebot chat-platform bot.
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults (sqlite:./data/huddlebot.db)
//! cargo run --bin huddlebot-server
//!
//! # Override database URL
//! cargo run --bin huddlebot-server -- --database-url sqlite:./data/bot.db
//!
//! # Verbose output
//! cargo run --bin huddlebot-server -- -v
//! ```

use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use huddlebot::config::environment::ServerConfig;
use huddlebot::context::ServerResources;
use huddlebot::crypto::load_encryption_key;
use huddlebot::database::Database;
use huddlebot::errors::AppResult;
use huddlebot::health::HealthAuditor;
use huddlebot::jobs::handlers::CleanupHandler;
use huddlebot::jobs::{
    CheckScope, CleanupPayload, CleanupTarget, HealthCheckPayload, JobPayload, JobType,
    ScheduleOptions,
};

/// Nightly cleanup schedule (03:00 UTC)
const CLEANUP_CRON: &str = "0 0 3 * * *";

#[derive(Parser)]
#[command(
    name = "huddlebot-server",
    about = "Huddlebot multi-tenant bot backend",
    long_about = "Credential lifecycle, tenant client resolution, and durable background jobs"
)]
struct ServerArgs {
    /// Database URL override
    #[arg(long)]
    database_url: Option<String>,

    /// Enable verbose logging
    #[arg(long, short = 'v')]
    verbose: bool,
}

#[tokio::main]
async fn main() -> AppResult<()> {
    let args = ServerArgs::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let mut config = ServerConfig::from_env()?;
    if let Some(database_url) = args.database_url {
        config.database_url = database_url;
    }

    info!(
        database_url = %config.database_url,
        platform_api_base = %config.platform_api_base,
        "Starting huddlebot server"
    );

    let encryption_key = load_encryption_key(config.encryption_key_path.as_deref())?;
    let database = Arc::new(Database::new(&config.database_url, encryption_key).await?);

    let resources = Arc::new(ServerResources::new(config, database));

    register_handlers(&resources);
    resources.orchestrator.recover_interrupted_jobs().await?;
    resources.orchestrator.start();
    schedule_recurring_jobs(&resources).await?;

    info!("Huddlebot server running; press Ctrl-C to stop");
    shutdown_signal().await;

    info!("Shutdown signal received");
    resources.shutdown().await;
    Ok(())
}

/// Wait for SIGINT or, on Unix, SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        if let Err(e) = result {
                            warn!(error = %e, "Failed to listen for Ctrl-C");
                        }
                    }
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                }
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
        }
    }
}

/// Register the built-in handlers the server itself owns
///
/// Product handlers (reminders, reports, syncs) are registered by the bot
/// layer embedding this crate; their queues stay idle in a bare server.
fn register_handlers(resources: &ServerResources) {
    resources.orchestrator.register_handler(
        JobType::Cleanup,
        Arc::new(CleanupHandler::new(Arc::clone(&resources.database))),
    );
    resources.orchestrator.register_handler(
        JobType::CredentialHealthCheck,
        Arc::new(HealthAuditor::new(
            Arc::clone(&resources.database),
            Arc::clone(&resources.resolver),
        )),
    );
}

/// Enqueue the recurring audit and nightly cleanup
async fn schedule_recurring_jobs(resources: &ServerResources) -> AppResult<()> {
    resources
        .orchestrator
        .schedule(
            JobPayload::HealthCheck(HealthCheckPayload {
                check_type: CheckScope::All,
                tenant_id: None,
            }),
            ScheduleOptions {
                cron_expression: Some(resources.config.audit_cron.clone()),
                job_id: Some("credential-audit".into()),
                ..ScheduleOptions::default()
            },
        )
        .await?;

    resources
        .orchestrator
        .schedule(
            // No explicit cutoff: each firing purges relative to its own
            // run time
            JobPayload::Cleanup(CleanupPayload {
                target_type: CleanupTarget::CompletedJobs,
                older_than: None,
            }),
            ScheduleOptions {
                cron_expression: Some(CLEANUP_CRON.into()),
                job_id: Some("nightly-job-cleanup".into()),
                ..ScheduleOptions::default()
            },
        )
        .await?;

    Ok(())
}
