// ABOUTME: Durable job queue row operations backing the orchestrator's worker pools
// ABOUTME: Claiming is a single atomic UPDATE so concurrent workers never double-run a job
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Huddlebot

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::Database;
use crate::errors::{AppError, AppResult};
use crate::jobs::{JobPayload, JobType};
use crate::models::{JobRecord, JobStatus};

/// New job data for an enqueue
pub struct NewJob<'a> {
    /// Unique job identifier
    pub id: &'a str,
    /// Queue the job belongs to
    pub job_type: JobType,
    /// Typed payload, serialized at enqueue
    pub payload: &'a JobPayload,
    /// Occurrence key for recurring firings; `None` for one-shot jobs
    pub occurrence_key: Option<&'a str>,
    /// Earliest pickup time
    pub scheduled_at: DateTime<Utc>,
    /// Attempt budget
    pub max_attempts: u32,
}

/// Queue depth counts for one job type
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueStats {
    /// Pending jobs (includes delayed jobs not yet due)
    pub waiting: u64,
    /// Jobs currently claimed by a worker
    pub active: u64,
    /// Successfully finished jobs
    pub completed: u64,
    /// Jobs whose retries were exhausted
    pub failed: u64,
}

impl Database {
    /// Insert a pending job
    ///
    /// Returns `false` without inserting when a record for the same
    /// occurrence key (or the same ID) is still pending or active - the
    /// at-most-one-in-flight guarantee, enforced by a partial unique
    /// index. A finished record with the same ID is revived as a fresh
    /// pending job, so a stable caller-chosen ID can be enqueued again
    /// after each run.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the database operation fails.
    pub async fn insert_job(&self, job: &NewJob<'_>) -> AppResult<bool> {
        let payload_json = job.payload.to_json()?;

        let result = sqlx::query(
            r"
            INSERT INTO jobs (
                id, job_type, payload, occurrence_key, scheduled_at,
                status, attempts, max_attempts, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, 'pending', 0, $6, $7, $7)
            ON CONFLICT (id) DO UPDATE SET
                job_type = EXCLUDED.job_type,
                payload = EXCLUDED.payload,
                occurrence_key = EXCLUDED.occurrence_key,
                scheduled_at = EXCLUDED.scheduled_at,
                status = 'pending',
                attempts = 0,
                max_attempts = EXCLUDED.max_attempts,
                last_error = NULL,
                updated_at = EXCLUDED.updated_at
            WHERE jobs.status IN ('completed', 'failed', 'cancelled')
            ",
        )
        .bind(job.id)
        .bind(job.job_type.as_str())
        .bind(&payload_json)
        .bind(job.occurrence_key)
        .bind(job.scheduled_at)
        .bind(i64::from(job.max_attempts))
        .bind(Utc::now())
        .execute(&self.pool)
        .await;

        match result {
            // Zero rows touched means the same ID is still pending or
            // active: the upsert's WHERE clause skipped it
            Ok(done) => Ok(done.rows_affected() > 0),
            // A unique violation past the upsert target can only be the
            // in-flight occurrence index: a different ID holds the key
            Err(sqlx::Error::Database(db_err))
                if matches!(db_err.kind(), sqlx::error::ErrorKind::UniqueViolation)
                    && job.occurrence_key.is_some() =>
            {
                Ok(false)
            }
            Err(e) => Err(AppError::database(format!("Failed to insert job: {e}"))),
        }
    }

    /// Atomically claim due pending jobs for one queue
    ///
    /// Claimed jobs transition to `active` with their attempt counter
    /// bumped; the UPDATE is the only writer so two pools polling the same
    /// queue cannot claim the same row twice.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn claim_due_jobs(
        &self,
        job_type: JobType,
        limit: usize,
    ) -> AppResult<Vec<JobRecord>> {
        let now = Utc::now();
        let rows = sqlx::query(
            r"
            UPDATE jobs
            SET status = 'active', attempts = attempts + 1, updated_at = $1
            WHERE id IN (
                SELECT id FROM jobs
                WHERE job_type = $2 AND status = 'pending' AND scheduled_at <= $1
                ORDER BY scheduled_at ASC
                LIMIT $3
            )
            RETURNING id, job_type, payload, occurrence_key, scheduled_at,
                      status, attempts, max_attempts, last_error, created_at, updated_at
            ",
        )
        .bind(now)
        .bind(job_type.as_str())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to claim jobs: {e}")))?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            jobs.push(row_to_job_record(&row)?);
        }
        Ok(jobs)
    }

    /// Return orphaned `active` rows to the queue
    ///
    /// Run once at startup, before any worker pool starts: with a single
    /// server process, an active row at boot can only be left over from a
    /// crash or an aborted shutdown drain. Attempt counts are kept, so a
    /// job that keeps dying still exhausts its budget.
    ///
    /// Returns the number of rows reclaimed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn reclaim_stale_active_jobs(&self) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'pending', updated_at = $1 WHERE status = 'active'",
        )
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to reclaim active jobs: {e}")))?;

        Ok(result.rows_affected())
    }

    /// Mark an active job completed
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn complete_job(&self, id: &str) -> AppResult<()> {
        sqlx::query("UPDATE jobs SET status = 'completed', updated_at = $2 WHERE id = $1")
            .bind(id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to complete job: {e}")))?;
        Ok(())
    }

    /// Return a failed attempt to the queue for a later retry
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn release_job_for_retry(
        &self,
        id: &str,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> AppResult<()> {
        sqlx::query(
            r"
            UPDATE jobs
            SET status = 'pending', scheduled_at = $2, last_error = $3, updated_at = $4
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(next_attempt_at)
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to release job for retry: {e}")))?;
        Ok(())
    }

    /// Mark a job failed after its attempt budget is exhausted
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn mark_job_failed(&self, id: &str, error: &str) -> AppResult<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'failed', last_error = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to mark job failed: {e}")))?;
        Ok(())
    }

    /// Cancel a still-pending job
    ///
    /// Returns `false` when the job is already active, finished, or
    /// unknown - there is no preemption of running handlers.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn cancel_job(&self, id: &str) -> AppResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE jobs
            SET status = 'cancelled', updated_at = $2
            WHERE id = $1 AND status = 'pending'
            ",
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to cancel job: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    /// Fetch a job by ID
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_job(&self, id: &str) -> AppResult<Option<JobRecord>> {
        let row = sqlx::query(
            r"
            SELECT id, job_type, payload, occurrence_key, scheduled_at,
                   status, attempts, max_attempts, last_error, created_at, updated_at
            FROM jobs
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to query job: {e}")))?;

        row.map_or_else(|| Ok(None), |row| Ok(Some(row_to_job_record(&row)?)))
    }

    /// Queue depth counts grouped by job type
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn job_stats(&self) -> AppResult<HashMap<JobType, QueueStats>> {
        let rows = sqlx::query(
            r"
            SELECT job_type, status, COUNT(*) AS count
            FROM jobs
            GROUP BY job_type, status
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to query job stats: {e}")))?;

        let mut stats: HashMap<JobType, QueueStats> = JobType::ALL
            .into_iter()
            .map(|t| (t, QueueStats::default()))
            .collect();

        for row in rows {
            let job_type: JobType = row.get::<String, _>("job_type").parse()?;
            let status: JobStatus = row.get::<String, _>("status").parse()?;
            let count = u64::try_from(row.get::<i64, _>("count")).unwrap_or(0);
            let entry = stats.entry(job_type).or_default();
            match status {
                JobStatus::Pending => entry.waiting = count,
                JobStatus::Active => entry.active = count,
                JobStatus::Completed => entry.completed = count,
                JobStatus::Failed => entry.failed = count,
                JobStatus::Cancelled => {}
            }
        }
        Ok(stats)
    }

    /// Delete finished jobs (completed, failed, cancelled) older than the cutoff
    ///
    /// Returns the number of rows removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn purge_finished_jobs(&self, older_than: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query(
            r"
            DELETE FROM jobs
            WHERE status IN ('completed', 'failed', 'cancelled') AND updated_at < $1
            ",
        )
        .bind(older_than)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to purge finished jobs: {e}")))?;

        Ok(result.rows_affected())
    }
}

fn row_to_job_record(row: &SqliteRow) -> AppResult<JobRecord> {
    let job_type: JobType = row.get::<String, _>("job_type").parse()?;
    let payload = JobPayload::from_json(job_type, row.get("payload"))?;
    let status: JobStatus = row.get::<String, _>("status").parse()?;

    Ok(JobRecord {
        id: row.get("id"),
        job_type,
        payload,
        occurrence_key: row.get("occurrence_key"),
        scheduled_at: row.get("scheduled_at"),
        status,
        attempts: u32::try_from(row.get::<i64, _>("attempts")).unwrap_or(0),
        max_attempts: u32::try_from(row.get::<i64, _>("max_attempts")).unwrap_or(0),
        last_error: row.get("last_error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
