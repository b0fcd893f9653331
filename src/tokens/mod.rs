// ABOUTME: Credential store service - encrypted storage plus refresh orchestration
// ABOUTME: Refresh failures invalidate the stored credential and surface a typed error
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Huddlebot

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{info, warn};

use crate::database::credentials::CredentialData;
use crate::database::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{Credential, Provider, TenantId};
use crate::oauth::TokenRefresher;

/// Safety buffer applied to expiry checks: a token is treated as expired
/// this long before its literal expiry to avoid races with in-flight calls
pub const EXPIRY_SAFETY_BUFFER_SECS: i64 = 300;

/// Whether an expiry timestamp should be treated as expired right now
///
/// A credential with no expiry never expires. The five-minute safety
/// buffer means a token expiring in four minutes already counts as
/// expired.
#[must_use]
pub fn is_expired(expires_at: Option<DateTime<Utc>>) -> bool {
    expires_at.is_some_and(|at| {
        Utc::now() + ChronoDuration::seconds(EXPIRY_SAFETY_BUFFER_SECS) >= at
    })
}

/// Encrypted, provider-scoped credential storage with refresh support
///
/// Pure storage plus refresh orchestration; no knowledge of caches or job
/// queues. The refresher seam lets tests script provider behavior.
#[derive(Clone)]
pub struct CredentialStore {
    database: Arc<Database>,
    refresher: Arc<dyn TokenRefresher>,
}

impl CredentialStore {
    /// Create a credential store over the shared database
    #[must_use]
    pub fn new(database: Arc<Database>, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            database,
            refresher,
        }
    }

    /// Store (upsert) a credential for a tenant+provider pair
    ///
    /// Idempotent; both tokens are encrypted independently before they
    /// reach storage.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption or persistence fails.
    pub async fn store(
        &self,
        tenant_id: TenantId,
        provider: Provider,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
        scope: Option<&str>,
    ) -> AppResult<()> {
        self.database
            .upsert_credential(&CredentialData {
                tenant_id,
                provider,
                access_token,
                refresh_token,
                expires_at,
                scope: scope.unwrap_or(""),
            })
            .await?;
        info!(
            target: "huddlebot::auth",
            %tenant_id, %provider, "Stored credential"
        );
        Ok(())
    }

    /// Get a credential; invalidated rows read as absent
    ///
    /// # Errors
    ///
    /// Returns an error if the query or decryption fails.
    pub async fn get(
        &self,
        tenant_id: TenantId,
        provider: Provider,
    ) -> AppResult<Option<Credential>> {
        self.database.get_credential(tenant_id, provider).await
    }

    /// Get a credential, refreshing it first when it is expired
    ///
    /// This is the read path callers should prefer: it hides expiry
    /// entirely. Returns `None` when no valid credential exists.
    ///
    /// # Errors
    ///
    /// Propagates refresh failures (which also invalidate the credential)
    /// and storage errors.
    pub async fn get_fresh(
        &self,
        tenant_id: TenantId,
        provider: Provider,
    ) -> AppResult<Option<Credential>> {
        let Some(credential) = self.get(tenant_id, provider).await? else {
            return Ok(None);
        };
        if !is_expired(credential.expires_at) {
            return Ok(Some(credential));
        }
        self.refresh(tenant_id, provider).await?;
        self.get(tenant_id, provider).await
    }

    /// Refresh a credential's access token via the provider
    ///
    /// Requires a stored refresh token. On success the new material is
    /// stored, preserving the existing refresh token when the provider
    /// does not rotate it. On failure the credential is invalidated and a
    /// typed error propagates so the caller can prompt re-authorization.
    /// A refresh token revoked out-of-band fails here on first use and is
    /// treated the same way.
    ///
    /// # Errors
    ///
    /// Returns `AppError::TokenRefresh` on provider rejection or missing
    /// refresh token; storage errors propagate unchanged.
    pub async fn refresh(&self, tenant_id: TenantId, provider: Provider) -> AppResult<String> {
        let Some(credential) = self.get(tenant_id, provider).await? else {
            return Err(AppError::NoValidCredential(tenant_id));
        };

        let Some(refresh_token) = credential.refresh_token.as_deref() else {
            self.invalidate(tenant_id, provider).await?;
            return Err(AppError::TokenRefresh {
                tenant_id,
                provider,
                reason: "no refresh token stored".into(),
            });
        };

        match self.refresher.refresh(provider, refresh_token).await {
            Ok(refreshed) => {
                self.database
                    .update_refreshed_credential(
                        tenant_id,
                        provider,
                        &refreshed.access_token,
                        refreshed.refresh_token.as_deref(),
                        refreshed.expires_at,
                    )
                    .await?;
                info!(
                    target: "huddlebot::auth",
                    %tenant_id, %provider, "Refreshed credential"
                );
                Ok(refreshed.access_token)
            }
            Err(e) => {
                warn!(
                    target: "huddlebot::auth",
                    %tenant_id, %provider, error = %e,
                    "Token refresh failed, invalidating credential"
                );
                self.invalidate(tenant_id, provider).await?;
                Err(AppError::TokenRefresh {
                    tenant_id,
                    provider,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Mark a credential invalid without deleting it
    ///
    /// # Errors
    ///
    /// Returns an error if persistence fails.
    pub async fn invalidate(&self, tenant_id: TenantId, provider: Provider) -> AppResult<()> {
        self.database
            .invalidate_credential(tenant_id, provider)
            .await
    }

    /// Hard-delete a credential, used on explicit revocation
    ///
    /// # Errors
    ///
    /// Returns an error if persistence fails.
    pub async fn remove(&self, tenant_id: TenantId, provider: Provider) -> AppResult<()> {
        self.database.delete_credential(tenant_id, provider).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_expiry_never_expires() {
        assert!(!is_expired(None));
    }

    #[test]
    fn expiry_buffer_is_five_minutes() {
        assert!(is_expired(Some(Utc::now() + ChronoDuration::minutes(4))));
        assert!(!is_expired(Some(Utc::now() + ChronoDuration::minutes(6))));
    }

    #[test]
    fn past_expiry_is_expired() {
        assert!(is_expired(Some(Utc::now() - ChronoDuration::minutes(1))));
    }
}
