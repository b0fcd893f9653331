// ABOUTME: Integration tests for the durable job orchestrator and worker pools
// ABOUTME: Covers scheduling, retries, cancellation, dedup, stats, and shutdown
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Huddlebot

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};

use huddlebot::config::environment::JobsConfig;
use huddlebot::database::jobs::NewJob;
use huddlebot::database::Database;
use huddlebot::errors::{AppError, AppResult};
use huddlebot::jobs::handlers::CleanupHandler;
use huddlebot::jobs::{
    CleanupPayload, CleanupTarget, JobHandler, JobOrchestrator, JobPayload, JobType,
    ReminderPayload, ReminderType, ScheduleOptions,
};
use huddlebot::metrics::Metrics;
use huddlebot::models::JobStatus;

use common::{test_database, wait_for_job_status};

/// Handler that fails a scripted number of attempts before succeeding
struct FlakyHandler {
    fail_first: u32,
    calls: AtomicU32,
}

impl FlakyHandler {
    fn new(fail_first: u32) -> Self {
        Self {
            fail_first,
            calls: AtomicU32::new(0),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobHandler for FlakyHandler {
    async fn execute(&self, _payload: JobPayload) -> AppResult<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.fail_first {
            Err(AppError::external_service("provider returned HTTP 503"))
        } else {
            Ok(())
        }
    }
}

/// Handler that sleeps to simulate in-flight work during shutdown
struct SlowHandler {
    work: Duration,
    completed: AtomicU32,
}

#[async_trait]
impl JobHandler for SlowHandler {
    async fn execute(&self, _payload: JobPayload) -> AppResult<()> {
        tokio::time::sleep(self.work).await;
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn test_jobs_config() -> JobsConfig {
    JobsConfig {
        default_concurrency: 5,
        concurrency_overrides: HashMap::new(),
        max_attempts: 3,
        backoff_base: Duration::from_millis(10),
        poll_interval: Duration::from_millis(25),
        shutdown_timeout: Duration::from_secs(5),
        rate_limit_per_minute: None,
    }
}

fn reminder_payload() -> JobPayload {
    JobPayload::Reminder(ReminderPayload {
        task_id: "task-42".into(),
        user_id: "U123".into(),
        reminder_type: ReminderType::DayBefore,
        scheduled_at: Utc::now(),
        message: "Quarterly report due tomorrow".into(),
    })
}

fn orchestrator_with(
    database: &Arc<Database>,
    metrics: &Arc<Metrics>,
    handler: Arc<dyn JobHandler>,
) -> JobOrchestrator {
    let orchestrator = JobOrchestrator::new(
        Arc::clone(database),
        test_jobs_config(),
        Arc::clone(metrics),
    );
    orchestrator.register_handler(JobType::Reminder, handler);
    orchestrator.start();
    orchestrator
}

#[tokio::test]
async fn immediate_job_runs_to_completion() {
    let db = test_database().await;
    let metrics = Arc::new(Metrics::new());
    let handler = Arc::new(FlakyHandler::new(0));
    let orchestrator = orchestrator_with(&db, &metrics, Arc::clone(&handler) as _);

    let job_id = orchestrator
        .schedule(reminder_payload(), ScheduleOptions::default())
        .await
        .unwrap();

    wait_for_job_status(&db, &job_id, JobStatus::Completed, Duration::from_secs(5)).await;
    assert_eq!(handler.calls(), 1);
    assert_eq!(metrics.snapshot().jobs["reminder"].completed, 1);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn transient_failures_are_retried_with_backoff() {
    let db = test_database().await;
    let metrics = Arc::new(Metrics::new());
    let handler = Arc::new(FlakyHandler::new(2));
    let orchestrator = orchestrator_with(&db, &metrics, Arc::clone(&handler) as _);

    let job_id = orchestrator
        .schedule(reminder_payload(), ScheduleOptions::default())
        .await
        .unwrap();

    wait_for_job_status(&db, &job_id, JobStatus::Completed, Duration::from_secs(5)).await;
    let job = db.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.attempts, 3);
    assert_eq!(handler.calls(), 3);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn retries_stop_at_the_attempt_budget() {
    let db = test_database().await;
    let metrics = Arc::new(Metrics::new());
    let handler = Arc::new(FlakyHandler::new(u32::MAX));
    let orchestrator = orchestrator_with(&db, &metrics, Arc::clone(&handler) as _);

    let job_id = orchestrator
        .schedule(reminder_payload(), ScheduleOptions::default())
        .await
        .unwrap();

    wait_for_job_status(&db, &job_id, JobStatus::Failed, Duration::from_secs(5)).await;
    let job = db.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.attempts, 3, "Exactly max_attempts deliveries, no more");
    assert_eq!(handler.calls(), 3);
    assert!(job.last_error.as_deref().unwrap().contains("HTTP 503"));
    assert_eq!(metrics.snapshot().jobs["reminder"].failed, 1);

    // Budget exhausted: the record stays failed
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(handler.calls(), 3);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn delayed_jobs_wait_for_their_time() {
    let db = test_database().await;
    let metrics = Arc::new(Metrics::new());
    let handler = Arc::new(FlakyHandler::new(0));
    let orchestrator = orchestrator_with(&db, &metrics, Arc::clone(&handler) as _);

    let job_id = orchestrator
        .schedule(
            reminder_payload(),
            ScheduleOptions {
                delay: Some(Duration::from_millis(300)),
                ..ScheduleOptions::default()
            },
        )
        .await
        .unwrap();

    // Still pending well before the delay elapses
    tokio::time::sleep(Duration::from_millis(100)).await;
    let job = db.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(handler.calls(), 0);

    wait_for_job_status(&db, &job_id, JobStatus::Completed, Duration::from_secs(5)).await;
    assert_eq!(handler.calls(), 1);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn pending_jobs_can_be_cancelled_once() {
    let db = test_database().await;
    let metrics = Arc::new(Metrics::new());
    let orchestrator = orchestrator_with(&db, &metrics, Arc::new(FlakyHandler::new(0)));

    let job_id = orchestrator
        .schedule(
            reminder_payload(),
            ScheduleOptions {
                delay: Some(Duration::from_secs(60)),
                ..ScheduleOptions::default()
            },
        )
        .await
        .unwrap();

    assert!(orchestrator.cancel(&job_id).await.unwrap());
    let job = db.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);

    // Already cancelled, and unknown IDs behave the same
    assert!(!orchestrator.cancel(&job_id).await.unwrap());
    assert!(!orchestrator.cancel("no-such-job").await.unwrap());

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn caller_chosen_ids_deduplicate_enqueues() {
    let db = test_database().await;
    let metrics = Arc::new(Metrics::new());
    let orchestrator = orchestrator_with(&db, &metrics, Arc::new(FlakyHandler::new(0)));

    let options = || ScheduleOptions {
        delay: Some(Duration::from_secs(60)),
        job_id: Some("reminder:task-42:U123".into()),
        ..ScheduleOptions::default()
    };

    let first = orchestrator.schedule(reminder_payload(), options()).await.unwrap();
    let second = orchestrator.schedule(reminder_payload(), options()).await.unwrap();
    assert_eq!(first, second);

    let stats = orchestrator.stats().await.unwrap();
    assert_eq!(stats[&JobType::Reminder].waiting, 1, "Duplicate was not inserted");

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn delay_and_cron_are_mutually_exclusive() {
    let db = test_database().await;
    let metrics = Arc::new(Metrics::new());
    let orchestrator =
        JobOrchestrator::new(Arc::clone(&db), test_jobs_config(), Arc::clone(&metrics));

    let err = orchestrator
        .schedule(
            reminder_payload(),
            ScheduleOptions {
                delay: Some(Duration::from_secs(1)),
                cron_expression: Some("* * * * * *".into()),
                ..ScheduleOptions::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));
}

#[tokio::test]
async fn malformed_cron_is_rejected() {
    let db = test_database().await;
    let metrics = Arc::new(Metrics::new());
    let orchestrator =
        JobOrchestrator::new(Arc::clone(&db), test_jobs_config(), Arc::clone(&metrics));

    let err = orchestrator
        .schedule(
            reminder_payload(),
            ScheduleOptions {
                cron_expression: Some("not a cron line".into()),
                ..ScheduleOptions::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));
}

#[tokio::test]
async fn recurring_jobs_fire_repeatedly() {
    let db = test_database().await;
    let metrics = Arc::new(Metrics::new());
    let handler = Arc::new(FlakyHandler::new(0));
    let orchestrator = orchestrator_with(&db, &metrics, Arc::clone(&handler) as _);

    let prefix = orchestrator
        .schedule(
            reminder_payload(),
            ScheduleOptions {
                cron_expression: Some("* * * * * *".into()),
                job_id: Some("every-second".into()),
                ..ScheduleOptions::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(prefix, "every-second");

    tokio::time::sleep(Duration::from_millis(2_600)).await;
    assert!(
        handler.calls() >= 2,
        "Expected at least two firings, saw {}",
        handler.calls()
    );

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn occurrence_keys_keep_one_record_in_flight() {
    let db = test_database().await;

    let payload = reminder_payload();
    let make_job = |id: &'static str| NewJob {
        id,
        job_type: JobType::Reminder,
        payload: &payload,
        occurrence_key: Some("every-second:1700000000"),
        scheduled_at: Utc::now(),
        max_attempts: 3,
    };

    assert!(db.insert_job(&make_job("occ-1")).await.unwrap());
    assert!(
        !db.insert_job(&make_job("occ-2")).await.unwrap(),
        "Second record for the same occurrence must be skipped"
    );

    // Once the first record finishes, the occurrence may be enqueued again
    db.complete_job("occ-1").await.unwrap();
    assert!(db.insert_job(&make_job("occ-3")).await.unwrap());
}

#[tokio::test]
async fn stable_job_ids_can_reenqueue_after_completion() {
    let db = test_database().await;

    let payload = reminder_payload();
    let make_job = || NewJob {
        id: "reminder:task-1:U1",
        job_type: JobType::Reminder,
        payload: &payload,
        occurrence_key: Some("reminder:task-1:U1"),
        scheduled_at: Utc::now(),
        max_attempts: 3,
    };

    assert!(db.insert_job(&make_job()).await.unwrap());
    assert!(
        !db.insert_job(&make_job()).await.unwrap(),
        "Duplicate must be skipped while the first record is in flight"
    );

    db.complete_job("reminder:task-1:U1").await.unwrap();
    assert!(
        db.insert_job(&make_job()).await.unwrap(),
        "A finished record must not block the same ID from running again"
    );

    let job = db.get_job("reminder:task-1:U1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 0, "Revived record starts with a fresh attempt budget");
}

#[tokio::test]
async fn completed_stable_ids_run_again_when_rescheduled() {
    let db = test_database().await;
    let metrics = Arc::new(Metrics::new());
    let handler = Arc::new(FlakyHandler::new(0));
    let orchestrator = orchestrator_with(&db, &metrics, Arc::clone(&handler) as _);

    let options = || ScheduleOptions {
        job_id: Some("reminder:task-7:U9".into()),
        ..ScheduleOptions::default()
    };

    let id = orchestrator.schedule(reminder_payload(), options()).await.unwrap();
    wait_for_job_status(&db, &id, JobStatus::Completed, Duration::from_secs(5)).await;

    // Same stable ID after completion: a fresh run, not a silent drop
    orchestrator.schedule(reminder_payload(), options()).await.unwrap();
    wait_for_job_status(&db, &id, JobStatus::Completed, Duration::from_secs(5)).await;
    assert_eq!(handler.calls(), 2);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn interrupted_active_jobs_are_reclaimed_at_startup() {
    let db = test_database().await;
    let metrics = Arc::new(Metrics::new());

    let payload = reminder_payload();
    db.insert_job(&NewJob {
        id: "orphan",
        job_type: JobType::Reminder,
        payload: &payload,
        occurrence_key: None,
        scheduled_at: Utc::now(),
        max_attempts: 3,
    })
    .await
    .unwrap();
    // Claim without running anything, as if the process died mid-job
    let claimed = db.claim_due_jobs(JobType::Reminder, 1).await.unwrap();
    assert_eq!(claimed.len(), 1);

    let orchestrator =
        JobOrchestrator::new(Arc::clone(&db), test_jobs_config(), Arc::clone(&metrics));
    assert_eq!(orchestrator.recover_interrupted_jobs().await.unwrap(), 1);
    assert_eq!(orchestrator.recover_interrupted_jobs().await.unwrap(), 0);

    let job = db.get_job("orphan").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending, "Orphaned active row returns to the queue");
    assert_eq!(job.attempts, 1, "The interrupted attempt still counts");
}

#[tokio::test]
async fn cleanup_without_cutoff_purges_relative_to_run_time() {
    let db = test_database().await;

    let payload = reminder_payload();
    for id in ["aged-job", "recent-job"] {
        db.insert_job(&NewJob {
            id,
            job_type: JobType::Reminder,
            payload: &payload,
            occurrence_key: None,
            scheduled_at: Utc::now(),
            max_attempts: 3,
        })
        .await
        .unwrap();
        db.complete_job(id).await.unwrap();
    }
    sqlx::query("UPDATE jobs SET updated_at = $1 WHERE id = 'aged-job'")
        .bind(Utc::now() - ChronoDuration::days(8))
        .execute(db.pool())
        .await
        .unwrap();

    CleanupHandler::new(Arc::clone(&db))
        .execute(JobPayload::Cleanup(CleanupPayload {
            target_type: CleanupTarget::CompletedJobs,
            older_than: None,
        }))
        .await
        .unwrap();

    assert!(
        db.get_job("aged-job").await.unwrap().is_none(),
        "Records past the retention window are purged"
    );
    assert!(
        db.get_job("recent-job").await.unwrap().is_some(),
        "Records inside the retention window survive"
    );
}

#[tokio::test]
async fn invalid_payloads_are_rejected_at_enqueue() {
    use huddlebot::jobs::{CheckScope, HealthCheckPayload};

    let db = test_database().await;
    let metrics = Arc::new(Metrics::new());
    let orchestrator =
        JobOrchestrator::new(Arc::clone(&db), test_jobs_config(), Arc::clone(&metrics));

    let err = orchestrator
        .schedule(
            JobPayload::HealthCheck(HealthCheckPayload {
                check_type: CheckScope::SingleTenant,
                tenant_id: None,
            }),
            ScheduleOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));
}

#[tokio::test]
async fn stats_report_queue_depths() {
    let db = test_database().await;
    let metrics = Arc::new(Metrics::new());
    let handler = Arc::new(FlakyHandler::new(0));
    let orchestrator = orchestrator_with(&db, &metrics, Arc::clone(&handler) as _);

    let done = orchestrator
        .schedule(reminder_payload(), ScheduleOptions::default())
        .await
        .unwrap();
    wait_for_job_status(&db, &done, JobStatus::Completed, Duration::from_secs(5)).await;

    orchestrator
        .schedule(
            reminder_payload(),
            ScheduleOptions {
                delay: Some(Duration::from_secs(60)),
                ..ScheduleOptions::default()
            },
        )
        .await
        .unwrap();

    let stats = orchestrator.stats().await.unwrap();
    let reminder = &stats[&JobType::Reminder];
    assert_eq!(reminder.completed, 1);
    assert_eq!(reminder.waiting, 1);
    assert_eq!(reminder.active, 0);
    assert_eq!(reminder.failed, 0);
    // Queues without traffic still report zeroed stats
    assert_eq!(stats[&JobType::Cleanup].waiting, 0);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn shutdown_drains_active_jobs() {
    let db = test_database().await;
    let metrics = Arc::new(Metrics::new());
    let handler = Arc::new(SlowHandler {
        work: Duration::from_millis(300),
        completed: AtomicU32::new(0),
    });
    let orchestrator = orchestrator_with(&db, &metrics, Arc::clone(&handler) as _);

    let job_id = orchestrator
        .schedule(reminder_payload(), ScheduleOptions::default())
        .await
        .unwrap();
    wait_for_job_status(&db, &job_id, JobStatus::Active, Duration::from_secs(5)).await;

    orchestrator.shutdown().await;

    assert_eq!(handler.completed.load(Ordering::SeqCst), 1);
    let job = db.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed, "In-flight work finishes before shutdown");
}

#[tokio::test]
async fn shutdown_leaves_pending_jobs_unclaimed() {
    let db = test_database().await;
    let metrics = Arc::new(Metrics::new());
    let handler = Arc::new(SlowHandler {
        work: Duration::from_millis(300),
        completed: AtomicU32::new(0),
    });
    // Single worker slot: the second job stays pending while the first runs
    let mut config = test_jobs_config();
    config.default_concurrency = 1;
    let orchestrator = JobOrchestrator::new(Arc::clone(&db), config, Arc::clone(&metrics));
    orchestrator.register_handler(JobType::Reminder, Arc::clone(&handler) as _);
    orchestrator.start();

    let active = orchestrator
        .schedule(reminder_payload(), ScheduleOptions::default())
        .await
        .unwrap();
    wait_for_job_status(&db, &active, JobStatus::Active, Duration::from_secs(5)).await;

    // Due immediately, but the pool is saturated when shutdown begins
    let pending = orchestrator
        .schedule(reminder_payload(), ScheduleOptions::default())
        .await
        .unwrap();

    orchestrator.shutdown().await;

    assert_eq!(handler.completed.load(Ordering::SeqCst), 1, "Only the active job ran");
    let drained = db.get_job(&active).await.unwrap().unwrap();
    assert_eq!(drained.status, JobStatus::Completed);
    let untouched = db.get_job(&pending).await.unwrap().unwrap();
    assert_eq!(
        untouched.status,
        JobStatus::Pending,
        "A job pending at shutdown is never claimed during the drain"
    );
    assert_eq!(untouched.attempts, 0);
}
