// ABOUTME: Per-queue worker pool - claims due jobs, runs handlers, applies retry policy
// ABOUTME: Concurrency is semaphore-bounded; an optional fixed window guards downstream rate limits
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Huddlebot

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::{JobHandler, JobType};
use crate::database::Database;
use crate::metrics::Metrics;
use crate::models::JobRecord;

/// Fixed-window allowance against a downstream API's rate limit
///
/// Owned by a single worker loop, so no synchronization is needed.
struct RateWindow {
    limit: u32,
    window_start: Instant,
    used: u32,
}

impl RateWindow {
    const WINDOW: Duration = Duration::from_secs(60);

    fn new(limit: u32) -> Self {
        Self {
            limit,
            window_start: Instant::now(),
            used: 0,
        }
    }

    fn allowance(&mut self) -> usize {
        if self.window_start.elapsed() >= Self::WINDOW {
            self.window_start = Instant::now();
            self.used = 0;
        }
        (self.limit.saturating_sub(self.used)) as usize
    }

    fn consume(&mut self, n: usize) {
        self.used = self.used.saturating_add(u32::try_from(n).unwrap_or(u32::MAX));
    }
}

/// One queue's worker pool
pub(crate) struct WorkerPool {
    pub job_type: JobType,
    pub database: Arc<Database>,
    pub handler: Arc<dyn JobHandler>,
    pub metrics: Arc<Metrics>,
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub backoff_base: Duration,
    pub rate_limit_per_minute: Option<u32>,
    pub paused: Arc<AtomicBool>,
    pub shutdown: watch::Receiver<bool>,
}

impl WorkerPool {
    /// Spawn the pool's polling loop
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        info!(
            target: "huddlebot::jobs",
            job_type = %self.job_type,
            concurrency = self.concurrency,
            "Worker pool started"
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks: JoinSet<()> = JoinSet::new();
        let mut rate_window = self.rate_limit_per_minute.map(RateWindow::new);

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => break,
                () = sleep(self.poll_interval) => {}
            }

            // Reap finished handler tasks so the JoinSet stays bounded
            while tasks.try_join_next().is_some() {}

            if self.paused.load(Ordering::SeqCst) {
                continue;
            }

            let mut budget = semaphore.available_permits();
            if let Some(window) = rate_window.as_mut() {
                budget = budget.min(window.allowance());
            }
            if budget == 0 {
                continue;
            }

            let claimed = match self.database.claim_due_jobs(self.job_type, budget).await {
                Ok(jobs) => jobs,
                Err(e) => {
                    error!(
                        target: "huddlebot::jobs",
                        job_type = %self.job_type, error = %e,
                        "Failed to claim jobs"
                    );
                    continue;
                }
            };

            if let Some(window) = rate_window.as_mut() {
                window.consume(claimed.len());
            }

            for job in claimed {
                let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                    break;
                };
                let database = Arc::clone(&self.database);
                let handler = Arc::clone(&self.handler);
                let metrics = Arc::clone(&self.metrics);
                let backoff_base = self.backoff_base;
                tasks.spawn(async move {
                    execute_one(&database, handler.as_ref(), &metrics, backoff_base, job).await;
                    drop(permit);
                });
            }
        }

        // Shutdown: stop claiming and let active handlers finish. The
        // orchestrator bounds this drain with the overall shutdown timeout
        // and aborts the pool if it runs over.
        info!(
            target: "huddlebot::jobs",
            job_type = %self.job_type,
            active = tasks.len(),
            "Worker pool draining"
        );
        while tasks.join_next().await.is_some() {}
        info!(target: "huddlebot::jobs", job_type = %self.job_type, "Worker pool stopped");
    }
}

/// Run one claimed job through its handler and apply the retry policy
async fn execute_one(
    database: &Database,
    handler: &dyn JobHandler,
    metrics: &Metrics,
    backoff_base: Duration,
    job: JobRecord,
) {
    let started = Instant::now();
    debug!(
        target: "huddlebot::jobs",
        job_id = %job.id, job_type = %job.job_type, attempt = job.attempts,
        "Executing job"
    );

    match handler.execute(job.payload.clone()).await {
        Ok(()) => {
            if let Err(e) = database.complete_job(&job.id).await {
                error!(
                    target: "huddlebot::jobs",
                    job_id = %job.id, error = %e,
                    "Failed to record job completion"
                );
                return;
            }
            metrics.record_job_completed(job.job_type, started.elapsed());
            debug!(target: "huddlebot::jobs", job_id = %job.id, "Job completed");
        }
        Err(e) if job.attempts < job.max_attempts => {
            let delay = retry_backoff(backoff_base, job.attempts);
            let next_attempt_at = Utc::now()
                + ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::seconds(2));
            warn!(
                target: "huddlebot::jobs",
                job_id = %job.id, job_type = %job.job_type,
                attempt = job.attempts, max_attempts = job.max_attempts,
                retry_in_ms = delay.as_millis() as u64,
                error = %e,
                "Job attempt failed, scheduling retry"
            );
            if let Err(db_err) = database
                .release_job_for_retry(&job.id, next_attempt_at, &e.to_string())
                .await
            {
                error!(
                    target: "huddlebot::jobs",
                    job_id = %job.id, error = %db_err,
                    "Failed to release job for retry"
                );
            }
        }
        Err(e) => {
            error!(
                target: "huddlebot::jobs",
                job_id = %job.id, job_type = %job.job_type,
                attempts = job.attempts, error = %e,
                "Job failed, retries exhausted"
            );
            if let Err(db_err) = database.mark_job_failed(&job.id, &e.to_string()).await {
                error!(
                    target: "huddlebot::jobs",
                    job_id = %job.id, error = %db_err,
                    "Failed to mark job failed"
                );
            }
            metrics.record_job_failed(job.job_type);
        }
    }
}

/// Exponential backoff: base delay doubled per completed attempt
fn retry_backoff(base: Duration, attempts_so_far: u32) -> Duration {
    let exponent = attempts_so_far.saturating_sub(1).min(16);
    base.saturating_mul(2u32.saturating_pow(exponent))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let base = Duration::from_secs(2);
        assert_eq!(retry_backoff(base, 1), Duration::from_secs(2));
        assert_eq!(retry_backoff(base, 2), Duration::from_secs(4));
        assert_eq!(retry_backoff(base, 3), Duration::from_secs(8));
    }

    #[test]
    fn rate_window_caps_and_resets() {
        let mut window = RateWindow::new(3);
        assert_eq!(window.allowance(), 3);
        window.consume(3);
        assert_eq!(window.allowance(), 0);
        window.window_start = Instant::now() - Duration::from_secs(61);
        assert_eq!(window.allowance(), 3);
    }
}
