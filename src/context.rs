// ABOUTME: Dependency injection container wiring every service exactly once at startup
// ABOUTME: Owns shutdown ordering; the database pool closes after everything above it

// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Huddlebot

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::config::ServerConfig;
use crate::database::Database;
use crate::errors::AppResult;
use crate::jobs::{JobOrchestrator, QueueStats};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::oauth::OAuth2Refresher;
use crate::resolver::{ClientResolver, CredentialSource, InstallationTokenSource, StaticTokenSource};
use crate::tokens::CredentialStore;

/// Serializable health snapshot combining counters and queue depths
#[derive(Debug, Serialize)]
pub struct HealthReport {
    /// Process-wide counters and gauges
    pub metrics: MetricsSnapshot,
    /// Queue depth by status, keyed by job type name
    pub queues: HashMap<String, QueueStats>,
}

/// All long-lived services, constructed once and shared by `Arc`
///
/// Construction order mirrors the dependency graph: database first, then
/// the services over it. Shutdown runs the same graph in reverse.
pub struct ServerResources {
    /// Loaded configuration
    pub config: ServerConfig,
    /// Shared storage and encryption
    pub database: Arc<Database>,
    /// Encrypted credential storage with refresh
    pub credential_store: CredentialStore,
    /// Tenant-to-client cache
    pub resolver: Arc<ClientResolver>,
    /// Durable background job system
    pub orchestrator: Arc<JobOrchestrator>,
    /// Process-wide counters
    pub metrics: Arc<Metrics>,
}

impl ServerResources {
    /// Wire all services over an already-migrated database
    #[must_use]
    pub fn new(config: ServerConfig, database: Arc<Database>) -> Self {
        let metrics = Arc::new(Metrics::new());

        let refresher = Arc::new(OAuth2Refresher::new(config.oauth.clone()));
        let credential_store = CredentialStore::new(Arc::clone(&database), refresher);

        let mut sources: Vec<Box<dyn CredentialSource>> =
            vec![Box::new(InstallationTokenSource::new(Arc::clone(&database)))];
        if let Some(token) = config.fallback_bot_token.clone() {
            sources.push(Box::new(StaticTokenSource::new(token)));
        }
        let resolver = Arc::new(ClientResolver::new(
            &config.cache,
            config.platform_api_base.clone(),
            sources,
            Arc::clone(&database),
            Arc::clone(&metrics),
        ));

        let orchestrator = Arc::new(JobOrchestrator::new(
            Arc::clone(&database),
            config.jobs.clone(),
            Arc::clone(&metrics),
        ));

        Self {
            config,
            database,
            credential_store,
            resolver,
            orchestrator,
            metrics,
        }
    }

    /// Operator-facing health snapshot: counters plus live queue depths
    ///
    /// # Errors
    ///
    /// Returns an error if the queue depth query fails.
    pub async fn health_report(&self) -> AppResult<HealthReport> {
        let queues = self
            .orchestrator
            .stats()
            .await?
            .into_iter()
            .map(|(job_type, stats)| (job_type.to_string(), stats))
            .collect();
        Ok(HealthReport {
            metrics: self.metrics.snapshot(),
            queues,
        })
    }

    /// Stop background work, then close storage
    ///
    /// The orchestrator drains first because its handlers still need the
    /// pool; the pool closes last.
    pub async fn shutdown(&self) {
        self.orchestrator.shutdown().await;
        self.database.close().await;
        info!(target: "huddlebot", "Server resources released");
    }
}
