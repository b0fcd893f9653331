// ABOUTME: Unified error handling for the huddlebot core with constructor helpers
// ABOUTME: All fallible operations return AppResult so callers can branch on error kind
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Huddlebot

use thiserror::Error;

use crate::models::{Provider, TenantId};

/// Result alias used throughout the crate
pub type AppResult<T> = Result<T, AppError>;

/// Unified application error
///
/// Recoverable conditions (cache miss, a single retryable job attempt) are
/// handled locally and never surface as `AppError`. Everything that changes
/// credential validity or exhausts retries does.
#[derive(Debug, Error)]
pub enum AppError {
    /// Database operation failed
    #[error("Database error: {0}")]
    Database(String),

    /// Internal error (encryption, key handling, serialization glue)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Caller provided invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Requested entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Provider rejected the credential outright
    #[error("Authentication invalid: {0}")]
    AuthInvalid(String),

    /// Configuration is missing or malformed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Downstream provider call failed
    #[error("External service error: {0}")]
    ExternalService(String),

    /// Token refresh failed; the stored credential has been invalidated
    /// and the workspace owner must re-authorize
    #[error("Token refresh failed for {provider} (tenant {tenant_id}): {reason}")]
    TokenRefresh {
        /// Tenant whose credential failed to refresh
        tenant_id: TenantId,
        /// Provider that rejected the refresh
        provider: Provider,
        /// Provider-supplied or transport-level failure reason
        reason: String,
    },

    /// No valid credential exists for the tenant; the user-facing layer
    /// should offer a re-authorization link
    #[error("No valid credential for tenant {0}")]
    NoValidCredential(TenantId),
}

impl AppError {
    /// Database operation failure
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Internal failure (encryption, serialization, invariant violation)
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Invalid caller-supplied input
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Entity not found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Authentication rejected by a provider
    pub fn auth_invalid(msg: impl Into<String>) -> Self {
        Self::AuthInvalid(msg.into())
    }

    /// Configuration problem
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// External provider failure
    pub fn external_service(msg: impl Into<String>) -> Self {
        Self::ExternalService(msg.into())
    }

    /// True when the error is an unambiguous auth-rejection signal, as
    /// opposed to a transient transport or provider failure
    #[must_use]
    pub const fn is_auth_rejection(&self) -> bool {
        matches!(
            self,
            Self::AuthInvalid(_) | Self::TokenRefresh { .. } | Self::NoValidCredential(_)
        )
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<uuid::Error> for AppError {
    fn from(e: uuid::Error) -> Self {
        Self::InvalidInput(format!("Invalid UUID: {e}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(format!("JSON serialization failed: {e}"))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        Self::ExternalService(e.to_string())
    }
}
