// ABOUTME: Core domain models: tenants, providers, credentials, installations, job records
// ABOUTME: Plain data types shared across storage, resolver, and orchestration layers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Huddlebot

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};

/// Identifier of an installing workspace (tenant)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(Uuid);

impl TenantId {
    /// Generate a new random tenant ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Access the underlying UUID
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TenantId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// External systems issuing delegated credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provider {
    /// The chat platform's own bot credential
    PlatformBot,
    /// Calendar provider
    Calendar,
    /// Documents provider
    Documents,
    /// Mail provider
    Mail,
}

impl Provider {
    /// All known providers, in audit order
    pub const ALL: [Self; 4] = [Self::PlatformBot, Self::Calendar, Self::Documents, Self::Mail];

    /// Stable string form used as the database key
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PlatformBot => "platform-bot",
            Self::Calendar => "calendar",
            Self::Documents => "documents",
            Self::Mail => "mail",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = AppError;

    fn from_str(s: &str) -> AppResult<Self> {
        match s {
            "platform-bot" => Ok(Self::PlatformBot),
            "calendar" => Ok(Self::Calendar),
            "documents" => Ok(Self::Documents),
            "mail" => Ok(Self::Mail),
            other => Err(AppError::invalid_input(format!("Unknown provider: {other}"))),
        }
    }
}

/// Decrypted OAuth credential for one tenant+provider pair
///
/// Token material is plaintext here; it is encrypted with AAD binding
/// before it ever reaches storage.
#[derive(Debug, Clone)]
pub struct Credential {
    /// Tenant this credential belongs to
    pub tenant_id: TenantId,
    /// Provider that issued the credential
    pub provider: Provider,
    /// Decrypted access token
    pub access_token: String,
    /// Decrypted refresh token, when the provider issued one
    pub refresh_token: Option<String>,
    /// Token type, always "Bearer" in practice
    pub token_type: String,
    /// Access token expiry; `None` means non-expiring
    pub expires_at: Option<DateTime<Utc>>,
    /// Granted OAuth scope
    pub scope: String,
    /// False after an irrecoverable refresh/auth failure
    pub is_valid: bool,
    /// Last successful refresh
    pub last_refresh_at: Option<DateTime<Utc>>,
    /// Row creation time
    pub created_at: DateTime<Utc>,
    /// Last row update
    pub updated_at: DateTime<Utc>,
}

/// A tenant's bot-level installation record
///
/// Distinct from per-provider `Credential` rows: the primary token is the
/// bot's own platform credential granted at install time.
#[derive(Debug, Clone)]
pub struct Installation {
    /// Installing workspace
    pub tenant_id: TenantId,
    /// Parent organization for hierarchical tenants
    pub parent_org_id: Option<String>,
    /// Decrypted bot-level platform token
    pub primary_token: String,
    /// Row creation time
    pub created_at: DateTime<Utc>,
    /// Last row update
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle state of a background job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for a worker (or for its scheduled time)
    Pending,
    /// Claimed by a worker, handler running
    Active,
    /// Handler returned successfully
    Completed,
    /// Retries exhausted
    Failed,
    /// Cancelled while still pending
    Cancelled,
}

impl JobStatus {
    /// Stable string form used as the database value
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl FromStr for JobStatus {
    type Err = AppError;

    fn from_str(s: &str) -> AppResult<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(AppError::database(format!("Unknown job status: {other}"))),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable job queue record
#[derive(Debug, Clone)]
pub struct JobRecord {
    /// Unique job identifier
    pub id: String,
    /// Queue this job belongs to
    pub job_type: crate::jobs::JobType,
    /// Typed payload, serialized as JSON in storage
    pub payload: crate::jobs::JobPayload,
    /// Stable key distinguishing one firing of a recurring job; `None`
    /// for one-shot jobs
    pub occurrence_key: Option<String>,
    /// Earliest time a worker may pick the job up
    pub scheduled_at: DateTime<Utc>,
    /// Current lifecycle state
    pub status: JobStatus,
    /// Delivery attempts so far
    pub attempts: u32,
    /// Attempt budget before the job is marked failed
    pub max_attempts: u32,
    /// Message from the most recent failed attempt
    pub last_error: Option<String>,
    /// Row creation time
    pub created_at: DateTime<Utc>,
    /// Last row update
    pub updated_at: DateTime<Utc>,
}
