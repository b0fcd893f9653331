// ABOUTME: Built-in job handlers owned by the server itself
// ABOUTME: Cleanup deletes aged records; product handlers live in the bot layer above

// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Huddlebot

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tracing::info;

use super::{CleanupTarget, JobHandler, JobPayload};
use crate::database::Database;
use crate::errors::{AppError, AppResult};

/// Retention window applied when a cleanup payload carries no explicit
/// cutoff
pub const DEFAULT_RETENTION_DAYS: i64 = 7;

/// Housekeeping handler for the cleanup queue
pub struct CleanupHandler {
    database: Arc<Database>,
}

impl CleanupHandler {
    /// Create a handler over the shared database
    #[must_use]
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }
}

#[async_trait]
impl JobHandler for CleanupHandler {
    async fn execute(&self, payload: JobPayload) -> AppResult<()> {
        let JobPayload::Cleanup(cleanup) = payload else {
            return Err(AppError::internal("Cleanup handler received foreign payload"));
        };

        // Computed per run, not per enqueue, so a recurring cleanup keeps
        // purging as the process stays up
        let older_than = cleanup
            .older_than
            .unwrap_or_else(|| Utc::now() - ChronoDuration::days(DEFAULT_RETENTION_DAYS));

        match cleanup.target_type {
            CleanupTarget::CompletedJobs => {
                let deleted = self.database.purge_finished_jobs(older_than).await?;
                info!(
                    target: "huddlebot::jobs",
                    deleted, older_than = %older_than,
                    "Purged finished job records"
                );
            }
            CleanupTarget::ExpiredTokens => {
                let deleted = self
                    .database
                    .purge_invalid_credentials(older_than)
                    .await?;
                info!(
                    target: "huddlebot::jobs",
                    deleted, older_than = %older_than,
                    "Purged invalidated credentials"
                );
            }
            CleanupTarget::OldLogs => {
                // Log retention is owned by the external log sink
                info!(target: "huddlebot::jobs", "Log cleanup requested; delegated to log sink");
            }
        }
        Ok(())
    }
}
