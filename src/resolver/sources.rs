// ABOUTME: Ordered credential sources tried in sequence when resolving a bot token
// ABOUTME: Explicit chain keeps the installation-then-fallback precedence auditable
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Huddlebot

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::database::Database;
use crate::errors::AppResult;
use crate::models::TenantId;

/// One strategy for obtaining a tenant's bot-level token
///
/// Sources are tried in order; the first one returning a token wins.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Produce a token for the tenant, or `None` when this source has
    /// nothing for it
    ///
    /// # Errors
    ///
    /// Returns an error on storage or decryption failure; "no token here"
    /// is `Ok(None)`, not an error.
    async fn bot_token(
        &self,
        tenant_id: TenantId,
        parent_org_id: Option<&str>,
    ) -> AppResult<Option<String>>;
}

/// Primary source: the tenant's OAuth installation record
pub struct InstallationTokenSource {
    database: Arc<Database>,
}

impl InstallationTokenSource {
    /// Create a source over the shared database
    #[must_use]
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }
}

#[async_trait]
impl CredentialSource for InstallationTokenSource {
    fn name(&self) -> &'static str {
        "installation"
    }

    async fn bot_token(
        &self,
        tenant_id: TenantId,
        parent_org_id: Option<&str>,
    ) -> AppResult<Option<String>> {
        let installation = self.database.get_installation(tenant_id, parent_org_id).await?;
        Ok(installation.map(|i| i.primary_token))
    }
}

/// Last-resort source: a statically configured bot token
///
/// Bypasses per-tenant isolation, so every use is logged at warn level.
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    /// Create a source around the configured fallback token
    #[must_use]
    pub fn new(token: String) -> Self {
        Self { token }
    }
}

#[async_trait]
impl CredentialSource for StaticTokenSource {
    fn name(&self) -> &'static str {
        "static-env"
    }

    async fn bot_token(
        &self,
        tenant_id: TenantId,
        _parent_org_id: Option<&str>,
    ) -> AppResult<Option<String>> {
        warn!(
            target: "huddlebot::cache",
            %tenant_id,
            "No installation found; using static fallback token (bypasses per-tenant isolation)"
        );
        Ok(Some(self.token.clone()))
    }
}
