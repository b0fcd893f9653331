// ABOUTME: Job type enumeration and typed per-job payloads validated at enqueue time
// ABOUTME: Payload field names are a wire contract consumed by external handlers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Huddlebot

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};
use crate::models::{Provider, TenantId};

/// The fixed set of background job queues
///
/// One durable queue and one worker pool exist per variant; the set is
/// enumerated rather than dynamic so handlers and concurrency limits can
/// be wired at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    /// Task reminder delivery
    Reminder,
    /// Daily activity report
    DailyReport,
    /// Weekly activity report
    WeeklyReport,
    /// Synchronization with an external provider
    ExternalSync,
    /// Housekeeping (completed jobs, expired tokens)
    Cleanup,
    /// Recurring credential audit
    CredentialHealthCheck,
}

impl JobType {
    /// All job types, used to build per-type queues and stats
    pub const ALL: [Self; 6] = [
        Self::Reminder,
        Self::DailyReport,
        Self::WeeklyReport,
        Self::ExternalSync,
        Self::Cleanup,
        Self::CredentialHealthCheck,
    ];

    /// Stable string form used as the database value and queue name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Reminder => "reminder",
            Self::DailyReport => "daily-report",
            Self::WeeklyReport => "weekly-report",
            Self::ExternalSync => "external-sync",
            Self::Cleanup => "cleanup",
            Self::CredentialHealthCheck => "credential-health-check",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = AppError;

    fn from_str(s: &str) -> AppResult<Self> {
        match s {
            "reminder" => Ok(Self::Reminder),
            "daily-report" => Ok(Self::DailyReport),
            "weekly-report" => Ok(Self::WeeklyReport),
            "external-sync" => Ok(Self::ExternalSync),
            "cleanup" => Ok(Self::Cleanup),
            "credential-health-check" => Ok(Self::CredentialHealthCheck),
            other => Err(AppError::invalid_input(format!("Unknown job type: {other}"))),
        }
    }
}

/// Kind of reminder being delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderType {
    /// Fires the day before the task is due
    DayBefore,
    /// Fires ahead of the user's next free block
    BeforeFreeTime,
}

/// Payload for `JobType::Reminder`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderPayload {
    /// Task the reminder refers to
    pub task_id: String,
    /// Recipient user
    pub user_id: String,
    /// Reminder kind
    pub reminder_type: ReminderType,
    /// When the reminder should reach the user
    pub scheduled_at: DateTime<Utc>,
    /// Rendered reminder text
    pub message: String,
}

/// Report cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    /// Daily summary
    Daily,
    /// Weekly summary
    Weekly,
}

/// Payload for `JobType::DailyReport` and `JobType::WeeklyReport`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportPayload {
    /// Report recipient
    pub user_id: String,
    /// Cadence, must agree with the job type it is enqueued under
    pub report_type: ReportType,
    /// Channel to post into; defaults to the user's DM when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    /// Whether to append productivity metrics
    pub include_metrics: bool,
}

/// Scope of an external synchronization run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncType {
    /// Re-fetch everything
    Full,
    /// Fetch changes since `last_sync_at`
    Incremental,
}

/// Payload for `JobType::ExternalSync`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSyncPayload {
    /// User whose data is synchronized
    pub user_id: String,
    /// Provider to sync against
    pub provider: Provider,
    /// Full or incremental run
    pub sync_type: SyncType,
    /// High-water mark for incremental runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<DateTime<Utc>>,
}

/// What a cleanup run should delete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupTarget {
    /// Completed/failed job records
    CompletedJobs,
    /// Invalidated credential rows
    ExpiredTokens,
    /// Log retention; handled by external sinks, accepted as a no-op
    OldLogs,
}

/// Payload for `JobType::Cleanup`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupPayload {
    /// What to delete
    pub target_type: CleanupTarget,
    /// Only records older than this are touched. Recurring cleanups omit
    /// it; each firing then derives the cutoff from the default retention
    /// window at run time, so the window tracks the clock instead of the
    /// enqueue moment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub older_than: Option<DateTime<Utc>>,
}

/// Scope of a credential audit run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckScope {
    /// Audit every stored installation
    All,
    /// Audit one tenant only
    SingleTenant,
}

/// Payload for `JobType::CredentialHealthCheck`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckPayload {
    /// Audit scope
    pub check_type: CheckScope,
    /// Required when `check_type` is `single-tenant`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<TenantId>,
}

/// Typed job payload, one variant per job type
///
/// Stored as the JSON form of the inner struct; the `jobs.job_type`
/// column disambiguates on read, so no tag is embedded in the JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum JobPayload {
    /// Reminder delivery
    Reminder(ReminderPayload),
    /// Daily or weekly report
    Report(ReportPayload),
    /// External provider sync
    ExternalSync(ExternalSyncPayload),
    /// Housekeeping
    Cleanup(CleanupPayload),
    /// Credential audit
    HealthCheck(HealthCheckPayload),
}

impl JobPayload {
    /// The job type this payload belongs on
    ///
    /// Report payloads map to the daily or weekly queue based on their
    /// declared cadence.
    #[must_use]
    pub const fn job_type(&self) -> JobType {
        match self {
            Self::Reminder(_) => JobType::Reminder,
            Self::Report(p) => match p.report_type {
                ReportType::Daily => JobType::DailyReport,
                ReportType::Weekly => JobType::WeeklyReport,
            },
            Self::ExternalSync(_) => JobType::ExternalSync,
            Self::Cleanup(_) => JobType::Cleanup,
            Self::HealthCheck(_) => JobType::CredentialHealthCheck,
        }
    }

    /// Validate internal consistency before enqueue
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidInput` if a `single-tenant` health check
    /// is missing its tenant ID.
    pub fn validate(&self) -> AppResult<()> {
        if let Self::HealthCheck(p) = self {
            if p.check_type == CheckScope::SingleTenant && p.tenant_id.is_none() {
                return Err(AppError::invalid_input(
                    "single-tenant health check requires a tenant_id",
                ));
            }
        }
        Ok(())
    }

    /// Serialize the inner payload to its stored JSON form
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> AppResult<String> {
        let json = match self {
            Self::Reminder(p) => serde_json::to_string(p)?,
            Self::Report(p) => serde_json::to_string(p)?,
            Self::ExternalSync(p) => serde_json::to_string(p)?,
            Self::Cleanup(p) => serde_json::to_string(p)?,
            Self::HealthCheck(p) => serde_json::to_string(p)?,
        };
        Ok(json)
    }

    /// Deserialize a stored payload, dispatching on the job type column
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON does not match the job type's schema.
    pub fn from_json(job_type: JobType, json: &str) -> AppResult<Self> {
        let payload = match job_type {
            JobType::Reminder => Self::Reminder(serde_json::from_str(json)?),
            JobType::DailyReport | JobType::WeeklyReport => {
                Self::Report(serde_json::from_str(json)?)
            }
            JobType::ExternalSync => Self::ExternalSync(serde_json::from_str(json)?),
            JobType::Cleanup => Self::Cleanup(serde_json::from_str(json)?),
            JobType::CredentialHealthCheck => Self::HealthCheck(serde_json::from_str(json)?),
        };
        Ok(payload)
    }
}
