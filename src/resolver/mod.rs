// ABOUTME: Bounded, TTL'd cache resolving a tenant identity into a live API client
// ABOUTME: Eviction and resolve share one lock so a stale client is never returned
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Huddlebot

/// Ordered credential source chain
pub mod sources;

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lru::LruCache;
use tracing::{debug, info};

use crate::config::CacheConfig;
use crate::database::Database;
use crate::errors::{AppError, AppResult};
use crate::metrics::Metrics;
use crate::models::{Provider, TenantId};
use crate::platform::BotClient;

pub use sources::{CredentialSource, InstallationTokenSource, StaticTokenSource};

/// One cached client handle
struct CacheEntry {
    client: Arc<BotClient>,
    inserted_at: Instant,
    size_bytes: usize,
}

/// Mutable cache state behind a single lock
///
/// Resolve, evict, and audit-driven invalidation all go through this lock,
/// which is what makes an evicted-then-resolved sequence safe: a resolve
/// can never observe an entry that an eviction already removed.
struct CacheState {
    entries: LruCache<String, CacheEntry>,
    /// Bumped on every explicit eviction. A resolve that started fetching
    /// before an eviction notices the bump and skips inserting its
    /// possibly-stale client.
    evict_generation: u64,
    memory_bytes: usize,
}

impl CacheState {
    fn remove(&mut self, key: &str) -> bool {
        if let Some(entry) = self.entries.pop(key) {
            self.memory_bytes = self.memory_bytes.saturating_sub(entry.size_bytes);
            true
        } else {
            false
        }
    }

    fn insert(&mut self, key: String, entry: CacheEntry) {
        self.memory_bytes += entry.size_bytes;
        if let Some((_, evicted)) = self.entries.push(key, entry) {
            // push returns the displaced LRU entry once capacity is hit
            self.memory_bytes = self.memory_bytes.saturating_sub(evicted.size_bytes);
        }
    }
}

/// Cache key: `tenant:parent_org` with a literal `null` for standalone
/// workspaces
fn cache_key(tenant_id: TenantId, parent_org_id: Option<&str>) -> String {
    format!("{tenant_id}:{}", parent_org_id.unwrap_or("null"))
}

/// Resolves `(tenant, parent_org)` into a ready-to-use platform client
///
/// Bounded LRU with per-entry TTL; misses walk the ordered credential
/// source chain and construct a fresh client. Shared by the request path
/// and the background audit path.
pub struct ClientResolver {
    state: Mutex<CacheState>,
    ttl: Duration,
    sources: Vec<Box<dyn CredentialSource>>,
    database: Arc<Database>,
    metrics: Arc<Metrics>,
    platform_api_base: String,
    http: reqwest::Client,
}

impl ClientResolver {
    /// Create a resolver with the given source chain
    ///
    /// Sources are tried in the order given; precedence is therefore
    /// explicit in construction rather than implicit in lookup code.
    #[must_use]
    pub fn new(
        config: &CacheConfig,
        platform_api_base: String,
        sources: Vec<Box<dyn CredentialSource>>,
        database: Arc<Database>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let capacity = NonZeroUsize::new(config.capacity.max(1))
            .unwrap_or_else(|| NonZeroUsize::new(1).expect("1 is non-zero"));
        Self {
            state: Mutex::new(CacheState {
                entries: LruCache::new(capacity),
                evict_generation: 0,
                memory_bytes: 0,
            }),
            ttl: config.ttl,
            sources,
            database,
            metrics,
            platform_api_base,
            http: reqwest::Client::new(),
        }
    }

    /// Resolve a tenant to a live client
    ///
    /// Cache hits refresh recency. Misses walk the credential source
    /// chain, build a client, and insert it - unless an eviction raced the
    /// fetch, in which case the freshly built client is returned without
    /// being cached so the next resolve re-reads storage.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NoValidCredential` when no source produces a
    /// token; storage and decryption errors propagate.
    pub async fn resolve(
        &self,
        tenant_id: TenantId,
        parent_org_id: Option<&str>,
    ) -> AppResult<Arc<BotClient>> {
        let key = cache_key(tenant_id, parent_org_id);

        let generation_before = {
            let mut state = self.lock_state();
            if let Some(entry) = state.entries.get(&key) {
                if entry.inserted_at.elapsed() < self.ttl {
                    let client = Arc::clone(&entry.client);
                    self.metrics.record_cache_hit();
                    debug!(target: "huddlebot::cache", cache_hit = true, %key, "Cache hit");
                    return Ok(client);
                }
                // Entry outlived its TTL; treat as a miss
                state.remove(&key);
            }
            self.metrics.record_cache_miss();
            debug!(target: "huddlebot::cache", cache_hit = false, %key, "Cache miss");
            state.evict_generation
        };

        let token = self.fetch_token(tenant_id, parent_org_id).await?;
        let client = Arc::new(BotClient::new(
            tenant_id,
            token,
            self.platform_api_base.clone(),
            self.http.clone(),
        ));

        {
            let mut state = self.lock_state();
            if state.evict_generation == generation_before {
                let entry = CacheEntry {
                    client: Arc::clone(&client),
                    inserted_at: Instant::now(),
                    size_bytes: key.len() + client.estimated_size_bytes(),
                };
                state.insert(key, entry);
            }
            self.update_gauges(&state);
        }

        Ok(client)
    }

    /// Whether a live entry exists for the tenant; refreshes recency
    ///
    /// An entry past its TTL counts as absent and is dropped, so it can
    /// never displace a live entry under capacity pressure.
    #[must_use]
    pub fn contains(&self, tenant_id: TenantId, parent_org_id: Option<&str>) -> bool {
        let key = cache_key(tenant_id, parent_org_id);
        let mut state = self.lock_state();
        if let Some(entry) = state.entries.get(&key) {
            if entry.inserted_at.elapsed() < self.ttl {
                return true;
            }
            state.remove(&key);
            self.update_gauges(&state);
        }
        false
    }

    /// Remove the cache entry only; storage is untouched
    pub fn evict(&self, tenant_id: TenantId, parent_org_id: Option<&str>) {
        let key = cache_key(tenant_id, parent_org_id);
        let mut state = self.lock_state();
        let removed = state.remove(&key);
        state.evict_generation += 1;
        self.update_gauges(&state);
        if removed {
            debug!(target: "huddlebot::cache", %key, "Evicted cache entry");
        }
    }

    /// Composite invalidation after an unambiguous auth rejection
    ///
    /// Evicts the cache entry and deletes both the installation and its
    /// platform credential, so the next resolve is a clean miss that leads
    /// to a re-authorization prompt rather than a dead token.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage deletes fail; the cache eviction
    /// has already happened by then.
    pub async fn on_invalid_credential(
        &self,
        tenant_id: TenantId,
        parent_org_id: Option<&str>,
    ) -> AppResult<()> {
        self.evict(tenant_id, parent_org_id);
        self.metrics.record_invalid_auth(tenant_id);

        self.database
            .delete_installation(tenant_id, parent_org_id)
            .await?;
        self.database
            .delete_credential(tenant_id, Provider::PlatformBot)
            .await?;

        info!(
            target: "huddlebot::cache",
            %tenant_id,
            "Invalid credential: evicted client and deleted stored authorization"
        );
        Ok(())
    }

    /// Current number of cached entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_state().entries.len()
    }

    /// Whether the cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Walk the source chain; first token wins
    async fn fetch_token(
        &self,
        tenant_id: TenantId,
        parent_org_id: Option<&str>,
    ) -> AppResult<String> {
        for source in &self.sources {
            if let Some(token) = source.bot_token(tenant_id, parent_org_id).await? {
                debug!(
                    target: "huddlebot::cache",
                    %tenant_id,
                    source = source.name(),
                    "Resolved bot token"
                );
                return Ok(token);
            }
        }
        Err(AppError::NoValidCredential(tenant_id))
    }

    fn update_gauges(&self, state: &CacheState) {
        self.metrics.set_cache_gauges(
            state.entries.len() as u64,
            state.memory_bytes as u64,
        );
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, CacheState> {
        // Lock poisoning would mean a panic while holding the guard; the
        // cache is rebuildable, so recover the inner state.
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
