// ABOUTME: Recurring job scheduler - turns a cron schedule into fresh pending records
// ABOUTME: Occurrence keys make each firing idempotent across scheduler restarts
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Huddlebot

use std::sync::Arc;

use chrono::Utc;
use cron::Schedule;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::{JobPayload, JobType};
use crate::database::jobs::NewJob;
use crate::database::Database;

/// Spawn a loop that enqueues one pending record per cron firing
///
/// Each firing gets the occurrence key `{prefix}:{unix_ts}`; the queue's
/// partial unique index rejects a duplicate while a prior record for the
/// same occurrence is still pending or active, so a slow handler never
/// stacks up concurrent runs of itself.
pub(crate) fn spawn_recurring(
    database: Arc<Database>,
    job_type: JobType,
    payload: JobPayload,
    schedule: Schedule,
    occurrence_prefix: String,
    max_attempts: u32,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            target: "huddlebot::jobs",
            job_type = %job_type,
            occurrence_prefix = %occurrence_prefix,
            "Recurring schedule registered"
        );

        loop {
            let Some(next_fire) = schedule.upcoming(Utc).next() else {
                // Schedule has no future firings (possible with fixed-date
                // expressions); nothing left to do.
                info!(
                    target: "huddlebot::jobs",
                    occurrence_prefix = %occurrence_prefix,
                    "Recurring schedule exhausted"
                );
                break;
            };

            let wait = (next_fire - Utc::now()).to_std().unwrap_or_default();
            tokio::select! {
                _ = shutdown.changed() => break,
                () = sleep(wait) => {}
            }

            let occurrence_key = format!("{occurrence_prefix}:{}", next_fire.timestamp());
            let id = Uuid::new_v4().to_string();
            let job = NewJob {
                id: &id,
                job_type,
                payload: &payload,
                occurrence_key: Some(&occurrence_key),
                scheduled_at: next_fire,
                max_attempts,
            };

            match database.insert_job(&job).await {
                Ok(true) => {
                    debug!(
                        target: "huddlebot::jobs",
                        %occurrence_key, "Enqueued recurring occurrence"
                    );
                }
                Ok(false) => {
                    debug!(
                        target: "huddlebot::jobs",
                        %occurrence_key,
                        "Occurrence already pending or active, skipping"
                    );
                }
                Err(e) => {
                    error!(
                        target: "huddlebot::jobs",
                        %occurrence_key, error = %e,
                        "Failed to enqueue recurring occurrence"
                    );
                }
            }
        }
    })
}
