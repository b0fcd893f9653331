// ABOUTME: OAuth 2.0 refresh client - huddlebot as a client to external providers
// ABOUTME: Authorization-code exchange happens upstream; only refresh lives here
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Huddlebot

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::config::ProviderOAuthConfig;
use crate::errors::{AppError, AppResult};
use crate::models::Provider;

/// Token material returned by a successful refresh
#[derive(Debug, Clone)]
pub struct RefreshedToken {
    /// New access token
    pub access_token: String,
    /// New refresh token; providers that rotate refresh tokens set this,
    /// others omit it and the stored token stays in use
    pub refresh_token: Option<String>,
    /// New expiry computed from the provider's `expires_in`
    pub expires_at: Option<DateTime<Utc>>,
    /// Scope, when the provider restates it
    pub scope: Option<String>,
}

/// Provider refresh endpoint abstraction
///
/// The credential store depends on this trait rather than a concrete HTTP
/// client so tests can substitute scripted refreshers.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Exchange a refresh token for fresh token material
    ///
    /// # Errors
    ///
    /// Returns `AppError::AuthInvalid` when the provider rejects the
    /// refresh token itself, `AppError::ExternalService` for transport or
    /// server-side failures, and `AppError::Config` when the provider has
    /// no configured endpoint.
    async fn refresh(&self, provider: Provider, refresh_token: &str)
        -> AppResult<RefreshedToken>;
}

/// Wire shape of a standard OAuth 2.0 token response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    scope: Option<String>,
}

/// Wire shape of a standard OAuth 2.0 error response
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// HTTP token refresher speaking the standard `refresh_token` grant
pub struct OAuth2Refresher {
    http: reqwest::Client,
    endpoints: HashMap<Provider, ProviderOAuthConfig>,
}

impl OAuth2Refresher {
    /// Create a refresher from per-provider endpoint configuration
    #[must_use]
    pub fn new(endpoints: HashMap<Provider, ProviderOAuthConfig>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoints,
        }
    }
}

#[async_trait]
impl TokenRefresher for OAuth2Refresher {
    async fn refresh(
        &self,
        provider: Provider,
        refresh_token: &str,
    ) -> AppResult<RefreshedToken> {
        let endpoint = self.endpoints.get(&provider).ok_or_else(|| {
            AppError::config(format!("No OAuth endpoint configured for {provider}"))
        })?;

        debug!(target: "huddlebot::auth", %provider, "Refreshing access token");

        let response = self
            .http
            .post(&endpoint.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", &endpoint.client_id),
                ("client_secret", &endpoint.client_secret),
            ])
            .send()
            .await
            .map_err(|e| AppError::external_service(format!("{provider} refresh failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            let token: TokenResponse = response.json().await.map_err(|e| {
                AppError::external_service(format!("{provider} returned malformed token: {e}"))
            })?;
            return Ok(RefreshedToken {
                access_token: token.access_token,
                refresh_token: token.refresh_token,
                expires_at: token
                    .expires_in
                    .map(|secs| Utc::now() + ChronoDuration::seconds(secs)),
                scope: token.scope,
            });
        }

        let body = response.text().await.unwrap_or_default();
        // 4xx with an OAuth error body is a definitive rejection of the
        // refresh token; everything else is a transient provider failure.
        if status.is_client_error() {
            let reason = serde_json::from_str::<TokenErrorResponse>(&body).map_or_else(
                |_| format!("HTTP {status}"),
                |e| {
                    e.error_description
                        .map_or(e.error.clone(), |d| format!("{}: {d}", e.error))
                },
            );
            return Err(AppError::auth_invalid(format!(
                "{provider} rejected refresh token: {reason}"
            )));
        }

        Err(AppError::external_service(format!(
            "{provider} refresh returned HTTP {status}"
        )))
    }
}
