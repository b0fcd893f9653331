// ABOUTME: Live chat-platform API client handle plus the authenticated no-op probe
// ABOUTME: Distinguishes definitive auth rejection from transient provider failures
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Huddlebot

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::errors::{AppError, AppResult};
use crate::models::TenantId;

/// Platform error codes that unambiguously mean the credential is dead
///
/// Anything outside this set (timeouts, 5xx, rate limits) is transient and
/// must not trigger eviction.
const AUTH_REJECTION_CODES: [&str; 4] = [
    "invalid_auth",
    "token_revoked",
    "account_inactive",
    "not_authed",
];

/// Wire shape of the platform's auth test endpoint
#[derive(Debug, Deserialize)]
struct AuthTestResponse {
    ok: bool,
    error: Option<String>,
}

/// A live, authenticated handle for one tenant's platform API access
///
/// Constructed by the resolver and shared via `Arc`; holding one does not
/// pin the token as fresh - cache TTL bounds how long a handle lives.
pub struct BotClient {
    tenant_id: TenantId,
    token: String,
    base_url: String,
    http: reqwest::Client,
}

impl BotClient {
    /// Build a client from an already-resolved token
    #[must_use]
    pub fn new(tenant_id: TenantId, token: String, base_url: String, http: reqwest::Client) -> Self {
        Self {
            tenant_id,
            token,
            base_url,
            http,
        }
    }

    /// Tenant this client is bound to
    #[must_use]
    pub const fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// Bearer token carried by this handle
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Rough heap footprint of this handle, for the cache memory gauge
    #[must_use]
    pub fn estimated_size_bytes(&self) -> usize {
        std::mem::size_of::<Self>() + self.token.len() + self.base_url.len()
    }
}

impl std::fmt::Debug for BotClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Token material stays out of logs
        f.debug_struct("BotClient")
            .field("tenant_id", &self.tenant_id)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Lightweight authenticated no-op used by the credential audit
#[async_trait]
pub trait AuthProbe: Send + Sync {
    /// Verify the credential is still accepted by the provider
    ///
    /// # Errors
    ///
    /// Returns `AppError::AuthInvalid` only on an unambiguous rejection
    /// signal; transient failures surface as `AppError::ExternalService`.
    async fn probe_auth(&self) -> AppResult<()>;
}

#[async_trait]
impl AuthProbe for BotClient {
    async fn probe_auth(&self) -> AppResult<()> {
        let url = format!("{}/auth.test", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| AppError::external_service(format!("auth probe failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(AppError::auth_invalid("platform returned 401"));
        }
        if !status.is_success() {
            return Err(AppError::external_service(format!(
                "auth probe returned HTTP {status}"
            )));
        }

        let body: AuthTestResponse = response
            .json()
            .await
            .map_err(|e| AppError::external_service(format!("malformed auth response: {e}")))?;

        if body.ok {
            debug!(target: "huddlebot::auth", tenant_id = %self.tenant_id, "Auth probe ok");
            return Ok(());
        }

        let code = body.error.unwrap_or_default();
        if AUTH_REJECTION_CODES.contains(&code.as_str()) {
            Err(AppError::auth_invalid(format!(
                "platform rejected credential: {code}"
            )))
        } else {
            Err(AppError::external_service(format!(
                "auth probe failed: {code}"
            )))
        }
    }
}
