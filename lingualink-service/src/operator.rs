//! In-process operator control surface.
//!
//! Everything the HTTP boundary can inspect or mutate at runtime goes
//! through this facade: the backend pool, the health prober, the
//! selection strategy, credentials, and the verification cache.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lingualink_auth::{ApiKeyRecord, CacheStats, CachedKeyVerifier, CreateKey, KeyStoreStats};
use lingualink_audio::{AudioNormalizer, ConversionStats};
use lingualink_balance::{
    BackendRegistry, BackendSnapshot, BackendStatus, HealthProber, Selector, Strategy,
};
use lingualink_core::{BackendConfig, Error, Result};
use serde::{Deserialize, Serialize};

use crate::dispatcher::Dispatcher;

/// Pool listing for operators.
#[derive(Debug, Clone, Serialize)]
pub struct BackendsOverview {
    pub strategy: Strategy,
    pub total_backends: usize,
    pub healthy_backends: usize,
    pub backends: BTreeMap<String, BackendSnapshot>,
}

/// Result of a forced probe.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub backend: String,
    pub health_status: BackendStatus,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_check_time: Option<DateTime<Utc>>,
}

/// Current selection parameters.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyInfo {
    pub strategy: Strategy,
    pub health_check_interval_secs: u64,
    pub max_retries: u32,
    pub failure_threshold: u32,
    pub available_strategies: Vec<&'static str>,
}

/// Partial update of the selection parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct StrategyUpdate {
    pub strategy: String,
    #[serde(default)]
    pub health_check_interval_secs: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub failure_threshold: Option<u32>,
}

/// Aggregate pool health.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub strategy: Strategy,
    pub total_backends: usize,
    pub healthy_backends: usize,
    pub unhealthy_backends: usize,
    pub prober_running: bool,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub overall_success_rate: f64,
    pub average_response_time: f64,
}

/// Runtime control surface over the pool, prober, selector, credentials,
/// and cache.
pub struct Operator {
    registry: Arc<BackendRegistry>,
    selector: Arc<Selector>,
    prober: Arc<HealthProber>,
    verifier: Arc<CachedKeyVerifier>,
    normalizer: Arc<AudioNormalizer>,
    dispatcher: Arc<Dispatcher>,
}

impl Operator {
    pub fn new(
        registry: Arc<BackendRegistry>,
        selector: Arc<Selector>,
        prober: Arc<HealthProber>,
        verifier: Arc<CachedKeyVerifier>,
        normalizer: Arc<AudioNormalizer>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self { registry, selector, prober, verifier, normalizer, dispatcher }
    }

    // --- Backend pool ---

    pub fn backends(&self) -> BackendsOverview {
        let backends = self.registry.snapshots();
        let healthy = self.registry.healthy_names().len();
        BackendsOverview {
            strategy: self.selector.strategy(),
            total_backends: backends.len(),
            healthy_backends: healthy,
            backends,
        }
    }

    /// Register a backend and rebuild the hash ring.
    pub fn add_backend(&self, config: BackendConfig) -> Result<()> {
        if config.name.is_empty() {
            return Err(Error::Config("backend name must not be empty".to_string()));
        }
        if config.weight == 0 {
            return Err(Error::Config("backend weight must be positive".to_string()));
        }
        self.registry.add(config);
        self.selector.rebuild_ring();
        Ok(())
    }

    pub fn remove_backend(&self, name: &str) -> bool {
        let removed = self.registry.remove(name);
        if removed {
            self.selector.rebuild_ring();
        }
        removed
    }

    pub fn enable_backend(&self, name: &str) -> bool {
        self.registry.enable(name)
    }

    pub fn disable_backend(&self, name: &str) -> bool {
        self.registry.disable(name)
    }

    /// Force a synchronous probe of one backend.
    pub async fn probe_backend(&self, name: &str) -> Result<ProbeReport> {
        let status = self.prober.probe_one(name).await?;
        let snapshot = self
            .registry
            .snapshot(name)
            .ok_or_else(|| Error::Internal(format!("unknown backend {name:?}")))?;
        Ok(ProbeReport {
            backend: name.to_string(),
            health_status: status,
            consecutive_failures: snapshot.metrics.consecutive_failures,
            last_error: snapshot.metrics.last_error,
            last_check_time: snapshot.metrics.last_check_time,
        })
    }

    // --- Strategy ---

    pub fn strategy(&self) -> StrategyInfo {
        StrategyInfo {
            strategy: self.selector.strategy(),
            health_check_interval_secs: self.prober.interval().as_secs(),
            max_retries: self.dispatcher.max_retries(),
            failure_threshold: self.prober.failure_threshold(),
            available_strategies: Strategy::all().iter().map(Strategy::as_str).collect(),
        }
    }

    pub fn set_strategy(&self, update: StrategyUpdate) -> Result<StrategyInfo> {
        let strategy = Strategy::from_str(&update.strategy)?;
        self.selector.set_strategy(strategy);
        if let Some(secs) = update.health_check_interval_secs {
            self.prober.set_interval(Duration::from_secs(secs));
        }
        if let Some(retries) = update.max_retries {
            self.dispatcher.set_max_retries(retries);
        }
        if let Some(threshold) = update.failure_threshold {
            self.prober.set_failure_threshold(threshold);
        }
        Ok(self.strategy())
    }

    // --- Prober lifecycle ---

    pub fn start_prober(&self) -> bool {
        self.prober.start()
    }

    pub fn stop_prober(&self) -> bool {
        self.prober.stop()
    }

    pub fn prober_running(&self) -> bool {
        self.prober.is_running()
    }

    // --- Aggregates ---

    pub fn status(&self) -> PoolStatus {
        let snapshots = self.registry.snapshots();
        let healthy = self.registry.healthy_names().len();
        let total_requests: u64 = snapshots.values().map(|s| s.metrics.total_requests).sum();
        let successful: u64 = snapshots.values().map(|s| s.metrics.successful_requests).sum();
        let measured: Vec<f64> = snapshots
            .values()
            .map(|s| s.metrics.average_response_time)
            .filter(|avg| *avg > 0.0)
            .collect();

        PoolStatus {
            strategy: self.selector.strategy(),
            total_backends: snapshots.len(),
            healthy_backends: healthy,
            unhealthy_backends: snapshots.len() - healthy,
            prober_running: self.prober.is_running(),
            total_requests,
            successful_requests: successful,
            overall_success_rate: if total_requests > 0 {
                successful as f64 / total_requests as f64
            } else {
                1.0
            },
            average_response_time: if measured.is_empty() {
                0.0
            } else {
                measured.iter().sum::<f64>() / measured.len() as f64
            },
        }
    }

    pub fn conversion_stats(&self) -> ConversionStats {
        self.normalizer.stats()
    }

    // --- Credentials ---

    pub fn create_key(&self, req: CreateKey) -> Result<String> {
        self.verifier.create(req)
    }

    pub fn revoke_key(&self, secret: &str) -> Result<bool> {
        self.verifier.revoke(secret)
    }

    pub fn set_key_admin(&self, secret: &str, admin: bool) -> Result<bool> {
        self.verifier.set_admin(secret, admin)
    }

    pub fn update_key_description(&self, secret: &str, description: &str) -> Result<bool> {
        self.verifier.update_description(secret, description)
    }

    pub fn list_keys(&self, include_revoked: bool) -> Result<Vec<ApiKeyRecord>> {
        self.verifier.list(include_revoked)
    }

    pub fn cleanup_expired_keys(&self) -> Result<u64> {
        self.verifier.cleanup_expired()
    }

    pub fn key_store_stats(&self) -> Result<KeyStoreStats> {
        self.verifier.store_stats()
    }

    // --- Verification cache ---

    pub fn cache_stats(&self) -> CacheStats {
        self.verifier.cache_stats()
    }

    pub fn invalidate_cache_entry(&self, secret: &str) -> bool {
        self.verifier.invalidate(secret)
    }

    pub fn clear_cache(&self) -> bool {
        self.verifier.clear_cache()
    }
}
