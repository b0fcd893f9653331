// ABOUTME: Shared test utilities and setup functions for integration tests
// ABOUTME: Provides in-memory database, scripted refresher, and job polling helpers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Huddlebot
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]
#![allow(dead_code)]
//! Shared test utilities for `huddlebot`
//!
//! Common setup helpers to reduce duplication across integration tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use huddlebot::config::environment::CacheConfig;
use huddlebot::crypto::generate_encryption_key;
use huddlebot::database::Database;
use huddlebot::errors::{AppError, AppResult};
use huddlebot::metrics::Metrics;
use huddlebot::models::{JobStatus, Provider, TenantId};
use huddlebot::oauth::{RefreshedToken, TokenRefresher};
use huddlebot::resolver::{ClientResolver, CredentialSource, InstallationTokenSource};

/// Fresh in-memory database with a random encryption key
pub async fn test_database() -> Arc<Database> {
    let key = generate_encryption_key().expect("Failed to generate key");
    Arc::new(
        Database::new("sqlite::memory:", key)
            .await
            .expect("Failed to create test database"),
    )
}

/// What a scripted refresher should do when called
pub enum RefreshScript {
    /// Return fresh token material
    Succeed {
        access_token: String,
        rotated_refresh_token: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    },
    /// Reject the refresh token as invalid
    Reject,
    /// Fail with a transient provider error
    Unavailable,
}

/// Test refresher following a fixed script, counting invocations
pub struct ScriptedRefresher {
    script: RefreshScript,
    calls: AtomicU32,
}

impl ScriptedRefresher {
    pub fn new(script: RefreshScript) -> Self {
        Self {
            script,
            calls: AtomicU32::new(0),
        }
    }

    pub fn succeeding(access_token: &str) -> Self {
        Self::new(RefreshScript::Succeed {
            access_token: access_token.into(),
            rotated_refresh_token: None,
            expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
        })
    }

    pub fn rejecting() -> Self {
        Self::new(RefreshScript::Reject)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenRefresher for ScriptedRefresher {
    async fn refresh(
        &self,
        provider: Provider,
        _refresh_token: &str,
    ) -> AppResult<RefreshedToken> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            RefreshScript::Succeed {
                access_token,
                rotated_refresh_token,
                expires_at,
            } => Ok(RefreshedToken {
                access_token: access_token.clone(),
                refresh_token: rotated_refresh_token.clone(),
                expires_at: *expires_at,
                scope: None,
            }),
            RefreshScript::Reject => Err(AppError::auth_invalid(format!(
                "{provider} rejected refresh token: invalid_grant"
            ))),
            RefreshScript::Unavailable => Err(AppError::external_service(format!(
                "{provider} refresh returned HTTP 503"
            ))),
        }
    }
}

/// Resolver backed only by installation records, with test-sized bounds
pub fn test_resolver(
    database: &Arc<Database>,
    metrics: &Arc<Metrics>,
    capacity: usize,
    ttl: Duration,
) -> ClientResolver {
    test_resolver_with_sources(
        database,
        metrics,
        capacity,
        ttl,
        vec![Box::new(InstallationTokenSource::new(Arc::clone(database)))],
    )
}

/// Resolver with an explicit source chain
pub fn test_resolver_with_sources(
    database: &Arc<Database>,
    metrics: &Arc<Metrics>,
    capacity: usize,
    ttl: Duration,
    sources: Vec<Box<dyn CredentialSource>>,
) -> ClientResolver {
    let config = CacheConfig { capacity, ttl };
    ClientResolver::new(
        &config,
        "http://localhost:9".into(),
        sources,
        Arc::clone(database),
        Arc::clone(metrics),
    )
}

/// Poll a job until it reaches the expected status, panicking on timeout
pub async fn wait_for_job_status(
    database: &Database,
    job_id: &str,
    status: JobStatus,
    timeout: Duration,
) {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        let job = database
            .get_job(job_id)
            .await
            .expect("Failed to query job")
            .expect("Job not found");
        if job.status == status {
            return;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "Job {job_id} stuck in {:?} waiting for {status:?}",
            job.status
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// A tenant that exists as an installation in storage
pub async fn install_tenant(database: &Database, token: &str) -> TenantId {
    let tenant = TenantId::new();
    database
        .upsert_installation(tenant, None, token)
        .await
        .expect("Failed to upsert installation");
    tenant
}
