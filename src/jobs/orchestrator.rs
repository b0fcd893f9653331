// ABOUTME: Job orchestrator - handler registry, scheduling API, and shutdown ordering
// ABOUTME: One durable queue and worker pool per job type, all over the shared database
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Huddlebot

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use cron::Schedule;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::scheduler::spawn_recurring;
use super::worker::WorkerPool;
use super::{JobHandler, JobPayload, JobType};
use crate::config::JobsConfig;
use crate::database::jobs::{NewJob, QueueStats};
use crate::database::Database;
use crate::errors::{AppError, AppResult};
use crate::metrics::Metrics;

/// Options controlling when and how a job runs
#[derive(Debug, Default)]
pub struct ScheduleOptions {
    /// Run after this delay instead of immediately
    pub delay: Option<Duration>,
    /// Recurring cron expression (seconds-resolution, six fields);
    /// mutually exclusive with `delay`
    pub cron_expression: Option<String>,
    /// Caller-chosen stable ID. For one-shot jobs it doubles as the
    /// occurrence key, making the enqueue idempotent; for recurring jobs
    /// it prefixes each occurrence key.
    pub job_id: Option<String>,
    /// Override the configured attempt budget
    pub max_attempts: Option<u32>,
}

/// Orchestrates durable background work across fixed job-type queues
///
/// Handlers are registered once per job type before `start`; the
/// orchestrator never knows concrete handler types beyond the trait.
pub struct JobOrchestrator {
    database: Arc<Database>,
    config: JobsConfig,
    metrics: Arc<Metrics>,
    handlers: RwLock<HashMap<JobType, Arc<dyn JobHandler>>>,
    paused: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
    scheduler_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl JobOrchestrator {
    /// Create an orchestrator over the shared database
    #[must_use]
    pub fn new(database: Arc<Database>, config: JobsConfig, metrics: Arc<Metrics>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            database,
            config,
            metrics,
            handlers: RwLock::new(HashMap::new()),
            paused: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            worker_handles: Mutex::new(Vec::new()),
            scheduler_handles: Mutex::new(Vec::new()),
        }
    }

    /// Register the handler for one job type
    ///
    /// Call before `start`; a queue without a handler stays idle and is
    /// logged at startup.
    pub fn register_handler(&self, job_type: JobType, handler: Arc<dyn JobHandler>) {
        if let Ok(mut handlers) = self.handlers.write() {
            if handlers.insert(job_type, handler).is_some() {
                warn!(
                    target: "huddlebot::jobs",
                    %job_type, "Handler replaced; handlers should register once"
                );
            }
        }
    }

    /// Return jobs orphaned by a previous process to the queue
    ///
    /// Call once before `start`: an `active` row at boot has no worker
    /// attached, so it would otherwise sit stuck forever. Returns the
    /// number of jobs reclaimed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn recover_interrupted_jobs(&self) -> AppResult<u64> {
        let reclaimed = self.database.reclaim_stale_active_jobs().await?;
        if reclaimed > 0 {
            warn!(
                target: "huddlebot::jobs",
                reclaimed, "Returned interrupted active jobs to the queue"
            );
        }
        Ok(reclaimed)
    }

    /// Start one worker pool per registered job type
    pub fn start(&self) {
        let handlers = self
            .handlers
            .read()
            .map(|h| h.clone())
            .unwrap_or_default();

        let mut worker_handles = self
            .worker_handles
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        for job_type in JobType::ALL {
            let Some(handler) = handlers.get(&job_type) else {
                info!(
                    target: "huddlebot::jobs",
                    %job_type, "No handler registered; queue stays idle"
                );
                continue;
            };

            let pool = WorkerPool {
                job_type,
                database: Arc::clone(&self.database),
                handler: Arc::clone(handler),
                metrics: Arc::clone(&self.metrics),
                concurrency: self.config.concurrency_for(job_type),
                poll_interval: self.config.poll_interval,
                backoff_base: self.config.backoff_base,
                rate_limit_per_minute: self.config.rate_limit_per_minute,
                paused: Arc::clone(&self.paused),
                shutdown: self.shutdown_tx.subscribe(),
            };
            worker_handles.push(pool.spawn());
        }
    }

    /// Schedule a job for immediate, delayed, or recurring execution
    ///
    /// The payload's type determines the queue. Returns the job ID (for
    /// recurring jobs, the occurrence-key prefix).
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidInput` when both `delay` and
    /// `cron_expression` are set, the payload fails validation, or the
    /// cron expression does not parse.
    pub async fn schedule(
        &self,
        payload: JobPayload,
        options: ScheduleOptions,
    ) -> AppResult<String> {
        payload.validate()?;
        let job_type = payload.job_type();

        if options.delay.is_some() && options.cron_expression.is_some() {
            return Err(AppError::invalid_input(
                "delay and cron_expression are mutually exclusive",
            ));
        }

        let max_attempts = options.max_attempts.unwrap_or(self.config.max_attempts);

        if let Some(expression) = options.cron_expression {
            let schedule = Schedule::from_str(&expression).map_err(|e| {
                AppError::invalid_input(format!("Invalid cron expression {expression:?}: {e}"))
            })?;
            let prefix = options
                .job_id
                .unwrap_or_else(|| format!("{job_type}:recurring"));
            let handle = spawn_recurring(
                Arc::clone(&self.database),
                job_type,
                payload,
                schedule,
                prefix.clone(),
                max_attempts,
                self.shutdown_tx.subscribe(),
            );
            if let Ok(mut handles) = self.scheduler_handles.lock() {
                handles.push(handle);
            }
            return Ok(prefix);
        }

        let scheduled_at = options.delay.map_or_else(Utc::now, |delay| {
            Utc::now()
                + ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::zero())
        });
        let id = options
            .job_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let inserted = self
            .database
            .insert_job(&NewJob {
                id: &id,
                job_type,
                payload: &payload,
                // A caller-chosen ID doubles as the occurrence key so a
                // duplicate enqueue is a no-op while the first is in flight
                occurrence_key: Some(&id),
                scheduled_at,
                max_attempts,
            })
            .await?;

        if inserted {
            debug!(
                target: "huddlebot::jobs",
                job_id = %id, %job_type, %scheduled_at, "Job scheduled"
            );
        } else {
            debug!(
                target: "huddlebot::jobs",
                job_id = %id, %job_type, "Job already in flight, enqueue skipped"
            );
        }
        Ok(id)
    }

    /// Cancel a still-pending job
    ///
    /// Returns `false` when the job is already active, finished, or
    /// unknown; there is no preemption of running handlers.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn cancel(&self, job_id: &str) -> AppResult<bool> {
        self.database.cancel_job(job_id).await
    }

    /// Queue depth counts per job type
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn stats(&self) -> AppResult<HashMap<JobType, QueueStats>> {
        self.database.job_stats().await
    }

    /// Shut down in dependency order
    ///
    /// 1. Pause all queues so no new work is claimed.
    /// 2. Signal pools and schedulers; active jobs drain within the
    ///    configured timeout.
    /// 3. Abort anything still running after the timeout (abandoned work
    ///    is logged, not lost - unclaimed rows stay pending).
    ///
    /// The shared database pool is closed by the caller afterwards, since
    /// every component above depends on it.
    pub async fn shutdown(&self) {
        info!(target: "huddlebot::jobs", "Shutting down job orchestrator");
        self.paused.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);

        let scheduler_handles: Vec<_> = self
            .scheduler_handles
            .lock()
            .map(|mut h| h.drain(..).collect())
            .unwrap_or_default();
        for handle in scheduler_handles {
            let _ = handle.await;
        }

        let mut remaining: Vec<_> = self
            .worker_handles
            .lock()
            .map(|mut h| h.drain(..).collect())
            .unwrap_or_default();
        let deadline = timeout(self.config.shutdown_timeout, async {
            for handle in &mut remaining {
                let _ = handle.await;
            }
        })
        .await;

        if deadline.is_err() {
            warn!(
                target: "huddlebot::jobs",
                timeout_secs = self.config.shutdown_timeout.as_secs(),
                "Shutdown timeout exceeded; abandoning in-flight jobs"
            );
            for handle in &remaining {
                handle.abort();
            }
        }

        info!(target: "huddlebot::jobs", "Job orchestrator stopped");
    }
}
