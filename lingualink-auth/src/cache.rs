//! Read-through verification cache.
//!
//! Only positive verdicts are cached: a negative result must always hit
//! the authoritative store, so the cache cannot be used as a dictionary
//! oracle. The cache key is a 16-character prefix of the secret — the
//! full secret never leaves the store — and a prefix collision merely
//! grants a verdict that the next TTL expiry re-checks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lingualink_core::Result;
use serde::Serialize;

use crate::store::{ApiKeyRecord, CreateKey, KeyStore, KeyStoreStats};

const CACHE_KEY_PREFIX: &str = "api_key_auth:";
const SECRET_PREFIX_LEN: usize = 16;

/// Derive the cache key for a secret.
pub fn cache_key(secret: &str) -> String {
    let prefix: String = secret.chars().take(SECRET_PREFIX_LEN).collect();
    format!("{CACHE_KEY_PREFIX}{prefix}")
}

/// A cached positive verification result.
#[derive(Debug, Clone, Copy)]
pub struct CachedVerdict {
    pub valid: bool,
    pub admin: bool,
    pub cached_at: DateTime<Utc>,
}

/// Outcome of a credential verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Verification {
    pub valid: bool,
    pub admin: bool,
}

/// Pluggable cache backend for verification verdicts.
pub trait VerifyCache: Send + Sync {
    fn get(&self, secret: &str) -> Option<CachedVerdict>;
    fn insert(&self, secret: &str, verdict: CachedVerdict);
    fn invalidate(&self, secret: &str);
    fn clear(&self);
    fn entry_count(&self) -> u64;
    /// Prompt liveness probe.
    fn healthy(&self) -> bool;
}

/// In-process TTL cache on moka.
pub struct MokaVerifyCache {
    inner: moka::sync::Cache<String, CachedVerdict>,
}

impl MokaVerifyCache {
    pub fn new(ttl: Duration) -> Self {
        let inner = moka::sync::Cache::builder().time_to_live(ttl).build();
        Self { inner }
    }
}

impl VerifyCache for MokaVerifyCache {
    fn get(&self, secret: &str) -> Option<CachedVerdict> {
        self.inner.get(&cache_key(secret))
    }

    fn insert(&self, secret: &str, verdict: CachedVerdict) {
        self.inner.insert(cache_key(secret), verdict);
    }

    fn invalidate(&self, secret: &str) {
        self.inner.invalidate(&cache_key(secret));
    }

    fn clear(&self) {
        self.inner.invalidate_all();
    }

    fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }

    fn healthy(&self) -> bool {
        true
    }
}

/// Cache counters exposed to operators.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub healthy: bool,
    pub entries: u64,
    pub hits: u64,
    pub misses: u64,
    pub ttl_secs: u64,
}

/// Credential verifier: cache in front, store behind.
///
/// Construction decides the mode once: with a cache the hot path is a
/// cache probe plus a spawned best-effort usage bump; without one every
/// verification goes straight to the store. Administrative mutations
/// invalidate the cache entry synchronously before reporting success —
/// that is the only correctness-critical cache write.
pub struct CachedKeyVerifier {
    store: Arc<KeyStore>,
    cache: Option<Arc<dyn VerifyCache>>,
    auth_enabled: bool,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CachedKeyVerifier {
    pub fn new(
        store: Arc<KeyStore>,
        cache: Option<Arc<dyn VerifyCache>>,
        auth_enabled: bool,
        ttl: Duration,
    ) -> Self {
        if cache.is_none() {
            tracing::info!("verification cache disabled, all lookups go to the key store");
        }
        Self { store, cache, auth_enabled, ttl, hits: AtomicU64::new(0), misses: AtomicU64::new(0) }
    }

    pub fn store(&self) -> &Arc<KeyStore> {
        &self.store
    }

    /// Whether credentials are checked at all.
    pub fn auth_enabled(&self) -> bool {
        self.auth_enabled
    }

    /// Verify a presented secret.
    ///
    /// With auth globally disabled every caller is accepted as a
    /// non-admin principal.
    pub async fn verify(&self, secret: &str) -> Result<Verification> {
        if !self.auth_enabled {
            return Ok(Verification { valid: true, admin: false });
        }

        if let Some(cache) = &self.cache {
            if let Some(verdict) = cache.get(secret) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                // Usage metering on the hit path must not block the caller.
                let store = Arc::clone(&self.store);
                let owned = secret.to_string();
                tokio::spawn(async move {
                    if let Err(e) = store.touch(&owned) {
                        tracing::debug!("usage bump failed: {e}");
                    }
                });
                return Ok(Verification { valid: verdict.valid, admin: verdict.admin });
            }
            self.misses.fetch_add(1, Ordering::Relaxed);
        }

        let (valid, admin) = self.store.verify(secret)?;
        if valid {
            if let Some(cache) = &self.cache {
                cache.insert(secret, CachedVerdict { valid, admin, cached_at: Utc::now() });
            }
        }
        Ok(Verification { valid, admin })
    }

    /// Create a key (no cache interaction; a fresh secret cannot be cached).
    pub fn create(&self, req: CreateKey) -> Result<String> {
        self.store.create(req)
    }

    /// Revoke a key, invalidating its cache entry before returning.
    pub fn revoke(&self, secret: &str) -> Result<bool> {
        let changed = self.store.revoke(secret)?;
        if let Some(cache) = &self.cache {
            cache.invalidate(secret);
        }
        Ok(changed)
    }

    /// Flip the admin bit, invalidating the cache entry before returning.
    pub fn set_admin(&self, secret: &str, admin: bool) -> Result<bool> {
        let changed = self.store.set_admin(secret, admin)?;
        if let Some(cache) = &self.cache {
            cache.invalidate(secret);
        }
        Ok(changed)
    }

    pub fn update_description(&self, secret: &str, description: &str) -> Result<bool> {
        self.store.update_description(secret, description)
    }

    pub fn list(&self, include_revoked: bool) -> Result<Vec<ApiKeyRecord>> {
        self.store.list(include_revoked)
    }

    pub fn cleanup_expired(&self) -> Result<u64> {
        self.store.cleanup_expired()
    }

    pub fn store_stats(&self) -> Result<KeyStoreStats> {
        self.store.stats()
    }

    /// Drop one cached verdict.
    pub fn invalidate(&self, secret: &str) -> bool {
        match &self.cache {
            Some(cache) => {
                cache.invalidate(secret);
                true
            }
            None => false,
        }
    }

    /// Drop every cached verdict.
    pub fn clear_cache(&self) -> bool {
        match &self.cache {
            Some(cache) => {
                cache.clear();
                true
            }
            None => false,
        }
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache.is_some()
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            enabled: self.cache.is_some(),
            healthy: self.cache.as_ref().map(|c| c.healthy()).unwrap_or(false),
            entries: self.cache.as_ref().map(|c| c.entry_count()).unwrap_or(0),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            ttl_secs: self.ttl.as_secs(),
        }
    }
}
