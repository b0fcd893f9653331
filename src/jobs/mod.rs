// ABOUTME: Durable background job system - typed payloads, per-type queues, retries
// ABOUTME: Public surface is the orchestrator plus the handler trait it dispatches to

// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Huddlebot

pub mod handlers;
mod orchestrator;
mod scheduler;
mod types;
mod worker;

use async_trait::async_trait;

use crate::errors::AppResult;

pub use orchestrator::{JobOrchestrator, ScheduleOptions};
pub use types::{
    CheckScope, CleanupPayload, CleanupTarget, ExternalSyncPayload, HealthCheckPayload,
    JobPayload, JobType, ReminderPayload, ReminderType, ReportPayload, ReportType, SyncType,
};

pub use crate::database::jobs::QueueStats;

/// Executes jobs of one type
///
/// An `Err` return triggers the retry policy until the job's attempt
/// budget is spent.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Run one job to completion
    ///
    /// # Errors
    ///
    /// Returns an error when the job should be retried (or failed once
    /// the attempt budget is spent).
    async fn execute(&self, payload: JobPayload) -> AppResult<()>;
}
