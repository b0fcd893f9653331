// ABOUTME: Process-wide counters and gauges snapshotted as serializable structs
// ABOUTME: Operators consume these through health reporting, not a metrics exporter
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Huddlebot

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

use crate::jobs::JobType;
use crate::models::TenantId;

/// Upper bounds (milliseconds) of the job duration histogram buckets;
/// the last bucket is unbounded
const DURATION_BUCKET_BOUNDS_MS: [u64; 5] = [100, 500, 2_000, 10_000, 60_000];

/// Job duration histogram with fixed buckets
#[derive(Debug, Default)]
struct DurationHistogram {
    buckets: [AtomicU64; 6],
    total_ms: AtomicU64,
    count: AtomicU64,
}

impl DurationHistogram {
    fn observe(&self, duration: Duration) {
        let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        let idx = DURATION_BUCKET_BOUNDS_MS
            .iter()
            .position(|&bound| ms <= bound)
            .unwrap_or(DURATION_BUCKET_BOUNDS_MS.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.total_ms.fetch_add(ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> DurationSnapshot {
        DurationSnapshot {
            bucket_bounds_ms: DURATION_BUCKET_BOUNDS_MS.to_vec(),
            bucket_counts: self
                .buckets
                .iter()
                .map(|b| b.load(Ordering::Relaxed))
                .collect(),
            total_ms: self.total_ms.load(Ordering::Relaxed),
            count: self.count.load(Ordering::Relaxed),
        }
    }
}

/// Per-job-type counters
#[derive(Debug, Default)]
struct JobTypeMetrics {
    completed: AtomicU64,
    failed: AtomicU64,
    durations: DurationHistogram,
}

/// Serialized job duration distribution
#[derive(Debug, Clone, Serialize)]
pub struct DurationSnapshot {
    /// Bucket upper bounds in milliseconds; one extra unbounded bucket
    pub bucket_bounds_ms: Vec<u64>,
    /// Observation counts per bucket
    pub bucket_counts: Vec<u64>,
    /// Sum of observed durations
    pub total_ms: u64,
    /// Number of observations
    pub count: u64,
}

/// Serialized per-job-type counters
#[derive(Debug, Clone, Serialize)]
pub struct JobTypeSnapshot {
    /// Jobs that finished successfully
    pub completed: u64,
    /// Jobs whose retries were exhausted
    pub failed: u64,
    /// Handler duration distribution
    pub duration: DurationSnapshot,
}

/// Serialized client cache counters
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CacheSnapshot {
    /// Lookups answered from cache
    pub hits: u64,
    /// Lookups that fell through to construction
    pub misses: u64,
    /// Current entry count
    pub size: u64,
    /// Estimated heap footprint of cached handles
    pub estimated_memory_bytes: u64,
}

/// Full metrics snapshot for health reporting
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Client cache counters
    pub cache: CacheSnapshot,
    /// Per-job-type counters, keyed by queue name
    pub jobs: HashMap<String, JobTypeSnapshot>,
    /// Total unambiguous auth rejections observed
    pub invalid_auth_events: u64,
    /// Auth rejections per tenant
    pub invalid_auth_by_tenant: HashMap<String, u64>,
}

/// Process-wide metrics registry
///
/// Constructed once and shared through `ServerResources`; all counters are
/// lock-free except the per-tenant auth-rejection map.
#[derive(Debug)]
pub struct Metrics {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_size: AtomicU64,
    cache_memory_bytes: AtomicU64,
    invalid_auth_events: AtomicU64,
    invalid_auth_by_tenant: Mutex<HashMap<TenantId, u64>>,
    jobs: HashMap<JobType, JobTypeMetrics>,
}

impl Metrics {
    /// Create an empty registry covering every job type
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            cache_size: AtomicU64::new(0),
            cache_memory_bytes: AtomicU64::new(0),
            invalid_auth_events: AtomicU64::new(0),
            invalid_auth_by_tenant: Mutex::new(HashMap::new()),
            jobs: JobType::ALL
                .into_iter()
                .map(|t| (t, JobTypeMetrics::default()))
                .collect(),
        }
    }

    /// Record a cache hit
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cache miss
    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Update the cache size and memory gauges
    pub fn set_cache_gauges(&self, size: u64, memory_bytes: u64) {
        self.cache_size.store(size, Ordering::Relaxed);
        self.cache_memory_bytes.store(memory_bytes, Ordering::Relaxed);
    }

    /// Record a completed job and its handler duration
    pub fn record_job_completed(&self, job_type: JobType, duration: Duration) {
        if let Some(m) = self.jobs.get(&job_type) {
            m.completed.fetch_add(1, Ordering::Relaxed);
            m.durations.observe(duration);
        }
    }

    /// Record a job whose retries were exhausted
    pub fn record_job_failed(&self, job_type: JobType) {
        if let Some(m) = self.jobs.get(&job_type) {
            m.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record an unambiguous auth rejection for a tenant
    pub fn record_invalid_auth(&self, tenant_id: TenantId) {
        self.invalid_auth_events.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut by_tenant) = self.invalid_auth_by_tenant.lock() {
            *by_tenant.entry(tenant_id).or_insert(0) += 1;
        }
    }

    /// Snapshot all counters for health reporting
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let invalid_auth_by_tenant = self
            .invalid_auth_by_tenant
            .lock()
            .map(|m| {
                m.iter()
                    .map(|(tenant, count)| (tenant.to_string(), *count))
                    .collect()
            })
            .unwrap_or_default();

        MetricsSnapshot {
            cache: CacheSnapshot {
                hits: self.cache_hits.load(Ordering::Relaxed),
                misses: self.cache_misses.load(Ordering::Relaxed),
                size: self.cache_size.load(Ordering::Relaxed),
                estimated_memory_bytes: self.cache_memory_bytes.load(Ordering::Relaxed),
            },
            jobs: self
                .jobs
                .iter()
                .map(|(job_type, m)| {
                    (
                        job_type.to_string(),
                        JobTypeSnapshot {
                            completed: m.completed.load(Ordering::Relaxed),
                            failed: m.failed.load(Ordering::Relaxed),
                            duration: m.durations.snapshot(),
                        },
                    )
                })
                .collect(),
            invalid_auth_events: self.invalid_auth_events.load(Ordering::Relaxed),
            invalid_auth_by_tenant,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_buckets_observations() {
        let metrics = Metrics::new();
        metrics.record_job_completed(JobType::Reminder, Duration::from_millis(50));
        metrics.record_job_completed(JobType::Reminder, Duration::from_millis(1_500));
        metrics.record_job_failed(JobType::Reminder);

        let snap = metrics.snapshot();
        let reminder = &snap.jobs["reminder"];
        assert_eq!(reminder.completed, 2);
        assert_eq!(reminder.failed, 1);
        assert_eq!(reminder.duration.count, 2);
        assert_eq!(reminder.duration.bucket_counts[0], 1);
        assert_eq!(reminder.duration.bucket_counts[2], 1);
    }

    #[test]
    fn invalid_auth_is_labeled_by_tenant() {
        let metrics = Metrics::new();
        let tenant = TenantId::new();
        metrics.record_invalid_auth(tenant);
        metrics.record_invalid_auth(tenant);

        let snap = metrics.snapshot();
        assert_eq!(snap.invalid_auth_events, 2);
        assert_eq!(snap.invalid_auth_by_tenant[&tenant.to_string()], 2);
    }
}
