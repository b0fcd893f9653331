// ABOUTME: Environment-based server configuration with typed sections and defaults
// ABOUTME: Single from_env entry point; no config files, environment-only by policy
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Huddlebot

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::{AppError, AppResult};
use crate::jobs::JobType;
use crate::models::Provider;

/// Default bound on distinct tenants held in the client cache
pub const DEFAULT_CACHE_CAPACITY: usize = 500;
/// Default client cache entry lifetime
pub const DEFAULT_CACHE_TTL_SECS: u64 = 600;
/// Default concurrent jobs per worker pool
pub const DEFAULT_WORKER_CONCURRENCY: usize = 5;
/// Default attempt budget per job
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default first retry delay; doubles per attempt
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 2_000;
/// Default bound on graceful shutdown drain
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;
/// Default platform API budget per pool, per minute
pub const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 59;
/// Default credential audit schedule (every 10 minutes)
pub const DEFAULT_AUDIT_CRON: &str = "0 */10 * * * *";

/// Client cache sizing and lifetime
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum distinct `(tenant, parent_org)` entries
    pub capacity: usize,
    /// Per-entry time to live
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CACHE_CAPACITY,
            ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
        }
    }
}

/// Worker pool and retry policy configuration
#[derive(Debug, Clone)]
pub struct JobsConfig {
    /// Concurrency applied to pools without an explicit override
    pub default_concurrency: usize,
    /// Per-job-type concurrency overrides
    pub concurrency_overrides: HashMap<JobType, usize>,
    /// Attempt budget applied to jobs that do not set their own
    pub max_attempts: u32,
    /// First retry delay; doubles per subsequent attempt
    pub backoff_base: Duration,
    /// How long a worker pool sleeps between queue polls
    pub poll_interval: Duration,
    /// Bound on draining active jobs during shutdown
    pub shutdown_timeout: Duration,
    /// Optional downstream-API budget per pool, per minute
    pub rate_limit_per_minute: Option<u32>,
}

impl JobsConfig {
    /// Effective concurrency for one job type's pool
    #[must_use]
    pub fn concurrency_for(&self, job_type: JobType) -> usize {
        self.concurrency_overrides
            .get(&job_type)
            .copied()
            .unwrap_or(self.default_concurrency)
            .max(1)
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            default_concurrency: DEFAULT_WORKER_CONCURRENCY,
            concurrency_overrides: HashMap::new(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            poll_interval: Duration::from_millis(500),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            rate_limit_per_minute: Some(DEFAULT_RATE_LIMIT_PER_MINUTE),
        }
    }
}

/// OAuth endpoint and client credentials for one provider
#[derive(Debug, Clone)]
pub struct ProviderOAuthConfig {
    /// Token refresh endpoint
    pub token_url: String,
    /// OAuth client ID issued to this deployment
    pub client_id: String,
    /// OAuth client secret issued to this deployment
    pub client_secret: String,
}

/// Complete server configuration, loaded once at startup
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// SQLite database URL; also the durable queue backend
    pub database_url: String,
    /// Key file holding the base64 encryption key; when absent the
    /// `HUDDLEBOT_ENCRYPTION_KEY` env var is used as a fallback
    pub encryption_key_path: Option<PathBuf>,
    /// Client cache sizing
    pub cache: CacheConfig,
    /// Worker pools and retry policy
    pub jobs: JobsConfig,
    /// Static bot token used when a tenant has no installation record
    pub fallback_bot_token: Option<String>,
    /// Base URL of the chat platform API
    pub platform_api_base: String,
    /// Cron schedule for the recurring credential audit
    pub audit_cron: String,
    /// Per-provider OAuth endpoints; providers without an entry cannot
    /// refresh and surface a configuration error on first refresh
    pub oauth: HashMap<Provider, ProviderOAuthConfig>,
}

impl ServerConfig {
    /// Load configuration from the environment
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a numeric or duration variable fails
    /// to parse.
    pub fn from_env() -> AppResult<Self> {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:./data/huddlebot.db".into());

        let cache = CacheConfig {
            capacity: parse_env("HUDDLEBOT_CACHE_CAPACITY", DEFAULT_CACHE_CAPACITY)?,
            ttl: Duration::from_secs(parse_env(
                "HUDDLEBOT_CACHE_TTL_SECS",
                DEFAULT_CACHE_TTL_SECS,
            )?),
        };

        let jobs = JobsConfig {
            default_concurrency: parse_env(
                "HUDDLEBOT_WORKER_CONCURRENCY",
                DEFAULT_WORKER_CONCURRENCY,
            )?,
            concurrency_overrides: concurrency_overrides_from_env()?,
            max_attempts: parse_env("HUDDLEBOT_JOB_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?,
            backoff_base: Duration::from_millis(parse_env(
                "HUDDLEBOT_JOB_BACKOFF_BASE_MS",
                DEFAULT_BACKOFF_BASE_MS,
            )?),
            poll_interval: Duration::from_millis(parse_env("HUDDLEBOT_JOB_POLL_MS", 500)?),
            shutdown_timeout: Duration::from_secs(parse_env(
                "HUDDLEBOT_SHUTDOWN_TIMEOUT_SECS",
                DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            )?),
            rate_limit_per_minute: match parse_env(
                "HUDDLEBOT_PLATFORM_RATE_LIMIT_PER_MINUTE",
                DEFAULT_RATE_LIMIT_PER_MINUTE,
            )? {
                0 => None,
                n => Some(n),
            },
        };

        Ok(Self {
            database_url,
            encryption_key_path: env::var("HUDDLEBOT_ENCRYPTION_KEY_PATH")
                .ok()
                .map(PathBuf::from),
            cache,
            jobs,
            fallback_bot_token: env::var("HUDDLEBOT_FALLBACK_BOT_TOKEN").ok(),
            platform_api_base: env::var("HUDDLEBOT_PLATFORM_API_BASE")
                .unwrap_or_else(|_| "https://api.huddle.chat".into()),
            audit_cron: env::var("HUDDLEBOT_AUDIT_CRON")
                .unwrap_or_else(|_| DEFAULT_AUDIT_CRON.into()),
            oauth: oauth_from_env(),
        })
    }
}

/// Parse an env var, falling back to a default when unset
fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> AppResult<T> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| AppError::config(format!("{name} is not a valid value: {raw}"))),
        Err(_) => Ok(default),
    }
}

/// Read per-job-type concurrency overrides
///
/// Variables follow `HUDDLEBOT_CONCURRENCY_<TYPE>` with the job type
/// uppercased and dashes replaced, e.g. `HUDDLEBOT_CONCURRENCY_DAILY_REPORT=2`.
fn concurrency_overrides_from_env() -> AppResult<HashMap<JobType, usize>> {
    let mut overrides = HashMap::new();
    for job_type in JobType::ALL {
        let var = format!(
            "HUDDLEBOT_CONCURRENCY_{}",
            job_type.as_str().to_uppercase().replace('-', "_")
        );
        if let Ok(raw) = env::var(&var) {
            let value: usize = raw
                .parse()
                .map_err(|_| AppError::config(format!("{var} is not a valid value: {raw}")))?;
            overrides.insert(job_type, value);
        }
    }
    Ok(overrides)
}

/// Read per-provider OAuth endpoints
///
/// A provider is configured only when its token URL, client ID, and
/// client secret are all present, e.g. `HUDDLEBOT_CALENDAR_TOKEN_URL`.
fn oauth_from_env() -> HashMap<Provider, ProviderOAuthConfig> {
    let mut oauth = HashMap::new();
    for provider in Provider::ALL {
        let prefix = format!(
            "HUDDLEBOT_{}",
            provider.as_str().to_uppercase().replace('-', "_")
        );
        let token_url = env::var(format!("{prefix}_TOKEN_URL"));
        let client_id = env::var(format!("{prefix}_CLIENT_ID"));
        let client_secret = env::var(format!("{prefix}_CLIENT_SECRET"));
        if let (Ok(token_url), Ok(client_id), Ok(client_secret)) =
            (token_url, client_id, client_secret)
        {
            oauth.insert(
                provider,
                ProviderOAuthConfig {
                    token_url,
                    client_id,
                    client_secret,
                },
            );
        }
    }
    oauth
}
