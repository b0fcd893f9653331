// ABOUTME: Recurring credential audit - probes stored installations against the platform
// ABOUTME: Evicts only on unambiguous auth rejection; transient failures are left alone

// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Huddlebot

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::database::Database;
use crate::errors::{AppError, AppResult};
use crate::jobs::{CheckScope, JobHandler, JobPayload};
use crate::models::Installation;
use crate::platform::AuthProbe;
use crate::resolver::ClientResolver;

/// Tally of one audit run
#[derive(Debug, Default, Clone, Copy)]
pub struct AuditOutcome {
    /// Installations probed
    pub checked: usize,
    /// Installations whose credential was rejected and torn down
    pub evicted: usize,
    /// Probes that failed for reasons other than auth rejection
    pub transient_failures: usize,
}

/// Audits stored credentials by running an authenticated no-op per tenant
///
/// Registered as the handler for the credential health check queue, so
/// audits carry the queue's retry and concurrency semantics for free.
pub struct HealthAuditor {
    database: Arc<Database>,
    resolver: Arc<ClientResolver>,
}

impl HealthAuditor {
    /// Create an auditor over the shared resolver and storage
    ///
    /// Rejection metrics are emitted by the resolver's teardown path, so
    /// the auditor itself only counts and logs.
    #[must_use]
    pub fn new(database: Arc<Database>, resolver: Arc<ClientResolver>) -> Self {
        Self { database, resolver }
    }

    /// Run one audit pass over the given installations
    async fn audit(&self, installations: Vec<Installation>) -> AuditOutcome {
        let mut outcome = AuditOutcome::default();

        for installation in installations {
            outcome.checked += 1;
            let tenant_id = installation.tenant_id;
            let parent_org_id = installation.parent_org_id.as_deref();

            let client = match self.resolver.resolve(tenant_id, parent_org_id).await {
                Ok(client) => client,
                Err(e) => {
                    warn!(
                        target: "huddlebot::auth",
                        %tenant_id, error = %e,
                        "Audit could not resolve a client, skipping tenant"
                    );
                    outcome.transient_failures += 1;
                    continue;
                }
            };

            match client.probe_auth().await {
                Ok(()) => {}
                Err(e) if e.is_auth_rejection() => {
                    warn!(
                        target: "huddlebot::auth",
                        %tenant_id, error = %e,
                        "Audit found rejected credential, tearing down"
                    );
                    if let Err(teardown_err) = self
                        .resolver
                        .on_invalid_credential(tenant_id, parent_org_id)
                        .await
                    {
                        error!(
                            target: "huddlebot::auth",
                            %tenant_id, error = %teardown_err,
                            "Failed to tear down rejected credential"
                        );
                    }
                    outcome.evicted += 1;
                }
                Err(e) => {
                    // Timeouts, 5xx, and rate limits prove nothing about
                    // the credential; the next audit retries.
                    warn!(
                        target: "huddlebot::auth",
                        %tenant_id, error = %e,
                        "Audit probe failed transiently, credential untouched"
                    );
                    outcome.transient_failures += 1;
                }
            }
        }

        outcome
    }
}

#[async_trait]
impl JobHandler for HealthAuditor {
    async fn execute(&self, payload: JobPayload) -> AppResult<()> {
        let JobPayload::HealthCheck(check) = payload else {
            return Err(AppError::internal("Health auditor received foreign payload"));
        };

        let installations = match check.check_type {
            CheckScope::All => self.database.list_installations().await?,
            CheckScope::SingleTenant => {
                let tenant_id = check.tenant_id.ok_or_else(|| {
                    AppError::invalid_input("single-tenant health check requires a tenant_id")
                })?;
                self.database.list_tenant_installations(tenant_id).await?
            }
        };

        let outcome = self.audit(installations).await;
        info!(
            target: "huddlebot::auth",
            checked = outcome.checked,
            evicted = outcome.evicted,
            transient_failures = outcome.transient_failures,
            "Credential audit finished"
        );
        Ok(())
    }
}
