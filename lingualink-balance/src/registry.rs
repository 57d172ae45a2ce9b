//! Registry of upstream backends and their runtime metrics.
//!
//! Structural changes (add/remove) serialize on the registry's own
//! mutex; everything per-backend lives behind that backend's lock, so a
//! slow observer of one backend never stalls traffic to the others. No
//! operation holds more than one lock at a time.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use lingualink_core::BackendConfig;
use serde::Serialize;

/// Samples kept in the response-time ring.
pub const RESPONSE_TIME_WINDOW: usize = 50;

/// Per-backend health state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    Healthy,
    Unhealthy,
    Disabled,
}

#[derive(Debug)]
struct BackendMetrics {
    status: BackendStatus,
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    active_connections: u32,
    response_times: VecDeque<f64>,
    average_response_time: f64,
    consecutive_failures: u32,
    last_error: Option<String>,
    last_check_time: Option<DateTime<Utc>>,
}

impl BackendMetrics {
    fn new() -> Self {
        Self {
            status: BackendStatus::Healthy,
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            active_connections: 0,
            response_times: VecDeque::with_capacity(RESPONSE_TIME_WINDOW),
            average_response_time: 0.0,
            consecutive_failures: 0,
            last_error: None,
            last_check_time: None,
        }
    }

    fn record_response_time(&mut self, seconds: f64) {
        if self.response_times.len() == RESPONSE_TIME_WINDOW {
            self.response_times.pop_front();
        }
        self.response_times.push_back(seconds);
        self.average_response_time =
            self.response_times.iter().sum::<f64>() / self.response_times.len() as f64;
    }

    fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }
}

struct Backend {
    config: Mutex<BackendConfig>,
    metrics: Mutex<BackendMetrics>,
}

/// Backend configuration as shown to operators: everything except the
/// upstream credential.
#[derive(Debug, Clone, Serialize)]
pub struct BackendConfigView {
    pub name: String,
    pub url: String,
    pub model_name: String,
    pub weight: u32,
    pub max_connections: u32,
    pub timeout: f64,
    pub priority: i32,
    pub tags: Vec<String>,
}

impl From<&BackendConfig> for BackendConfigView {
    fn from(config: &BackendConfig) -> Self {
        Self {
            name: config.name.clone(),
            url: config.url.clone(),
            model_name: config.model_name.clone(),
            weight: config.weight,
            max_connections: config.max_connections,
            timeout: config.timeout,
            priority: config.priority,
            tags: config.tags.clone(),
        }
    }
}

/// Point-in-time copy of one backend's metrics.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub status: BackendStatus,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub active_connections: u32,
    pub average_response_time: f64,
    pub success_rate: f64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_check_time: Option<DateTime<Utc>>,
}

/// Config plus metrics, for operator listings.
#[derive(Debug, Clone, Serialize)]
pub struct BackendSnapshot {
    pub config: BackendConfigView,
    pub metrics: MetricsSnapshot,
}

/// What the selector needs to know about one healthy backend.
#[derive(Debug, Clone)]
pub struct SelectionCandidate {
    pub name: String,
    pub weight: u32,
    pub active_connections: u32,
    pub average_response_time: f64,
    pub response_time_samples: usize,
}

/// Exclusive owner of backend configurations and metrics.
pub struct BackendRegistry {
    backends: Mutex<BTreeMap<String, Arc<Backend>>>,
}

impl BackendRegistry {
    pub fn new(configs: Vec<BackendConfig>) -> Self {
        let registry = Self { backends: Mutex::new(BTreeMap::new()) };
        for config in configs {
            registry.add(config);
        }
        registry
    }

    /// Register a backend with fresh metrics, replacing any existing
    /// backend of the same name.
    pub fn add(&self, config: BackendConfig) {
        let name = config.name.clone();
        let backend = Arc::new(Backend {
            config: Mutex::new(config),
            metrics: Mutex::new(BackendMetrics::new()),
        });
        self.backends.lock().expect("registry lock poisoned").insert(name.clone(), backend);
        tracing::info!(backend = %name, "backend registered");
    }

    pub fn remove(&self, name: &str) -> bool {
        let removed =
            self.backends.lock().expect("registry lock poisoned").remove(name).is_some();
        if removed {
            tracing::info!(backend = %name, "backend removed");
        }
        removed
    }

    pub fn contains(&self, name: &str) -> bool {
        self.backends.lock().expect("registry lock poisoned").contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.backends.lock().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, name: &str) -> Option<Arc<Backend>> {
        self.backends.lock().expect("registry lock poisoned").get(name).cloned()
    }

    fn all(&self) -> Vec<(String, Arc<Backend>)> {
        self.backends
            .lock()
            .expect("registry lock poisoned")
            .iter()
            .map(|(name, backend)| (name.clone(), Arc::clone(backend)))
            .collect()
    }

    /// All backend names in deterministic (sorted) order.
    pub fn names(&self) -> Vec<String> {
        self.backends.lock().expect("registry lock poisoned").keys().cloned().collect()
    }

    /// Names of Healthy backends in deterministic (sorted) order.
    pub fn healthy_names(&self) -> Vec<String> {
        self.all()
            .into_iter()
            .filter(|(_, backend)| {
                backend.metrics.lock().expect("metrics lock poisoned").status
                    == BackendStatus::Healthy
            })
            .map(|(name, _)| name)
            .collect()
    }

    /// Selector view over the healthy subset, sorted by name.
    pub fn selection_view(&self) -> Vec<SelectionCandidate> {
        self.all()
            .into_iter()
            .filter_map(|(name, backend)| {
                let weight = backend.config.lock().expect("config lock poisoned").weight;
                let metrics = backend.metrics.lock().expect("metrics lock poisoned");
                (metrics.status == BackendStatus::Healthy).then(|| SelectionCandidate {
                    name,
                    weight,
                    active_connections: metrics.active_connections,
                    average_response_time: metrics.average_response_time,
                    response_time_samples: metrics.response_times.len(),
                })
            })
            .collect()
    }

    /// Weights of every registered backend (any status), sorted by name.
    /// The consistent-hash ring is built over this.
    pub fn ring_members(&self) -> Vec<(String, u32)> {
        self.all()
            .into_iter()
            .map(|(name, backend)| {
                (name, backend.config.lock().expect("config lock poisoned").weight)
            })
            .collect()
    }

    pub fn config(&self, name: &str) -> Option<BackendConfig> {
        self.get(name).map(|b| b.config.lock().expect("config lock poisoned").clone())
    }

    pub fn status(&self, name: &str) -> Option<BackendStatus> {
        self.get(name).map(|b| b.metrics.lock().expect("metrics lock poisoned").status)
    }

    /// Administrative enable: Disabled → Healthy with counters reset.
    pub fn enable(&self, name: &str) -> bool {
        let Some(backend) = self.get(name) else { return false };
        let mut metrics = backend.metrics.lock().expect("metrics lock poisoned");
        metrics.status = BackendStatus::Healthy;
        metrics.consecutive_failures = 0;
        tracing::info!(backend = %name, "backend enabled");
        true
    }

    /// Administrative disable. Probes keep running but cannot leave this
    /// state.
    pub fn disable(&self, name: &str) -> bool {
        let Some(backend) = self.get(name) else { return false };
        backend.metrics.lock().expect("metrics lock poisoned").status = BackendStatus::Disabled;
        tracing::info!(backend = %name, "backend disabled");
        true
    }

    /// Reserve one connection slot, refusing at `max_connections`.
    pub fn try_acquire(&self, name: &str) -> bool {
        let Some(backend) = self.get(name) else { return false };
        let max = backend.config.lock().expect("config lock poisoned").max_connections;
        let mut metrics = backend.metrics.lock().expect("metrics lock poisoned");
        if metrics.active_connections >= max {
            return false;
        }
        metrics.active_connections += 1;
        true
    }

    /// Release one connection slot; the counter never goes negative.
    pub fn release(&self, name: &str) {
        if let Some(backend) = self.get(name) {
            let mut metrics = backend.metrics.lock().expect("metrics lock poisoned");
            metrics.active_connections = metrics.active_connections.saturating_sub(1);
        }
    }

    pub fn active_connections(&self, name: &str) -> Option<u32> {
        self.get(name)
            .map(|b| b.metrics.lock().expect("metrics lock poisoned").active_connections)
    }

    /// Account the outcome of one dispatch attempt.
    pub fn record_result(
        &self,
        name: &str,
        success: bool,
        response_time_secs: f64,
        error: Option<&str>,
    ) {
        let Some(backend) = self.get(name) else { return };
        let mut metrics = backend.metrics.lock().expect("metrics lock poisoned");
        metrics.total_requests += 1;
        if success {
            metrics.successful_requests += 1;
            metrics.record_response_time(response_time_secs);
        } else {
            metrics.failed_requests += 1;
            metrics.last_error = error.map(|e| e.to_string());
        }
    }

    /// Probe succeeded: leave Disabled alone, otherwise mark Healthy and
    /// reset the failure streak.
    pub fn record_probe_success(&self, name: &str, response_time_secs: f64) {
        let Some(backend) = self.get(name) else { return };
        let mut metrics = backend.metrics.lock().expect("metrics lock poisoned");
        metrics.last_check_time = Some(Utc::now());
        if metrics.status == BackendStatus::Disabled {
            return;
        }
        if metrics.status == BackendStatus::Unhealthy {
            tracing::info!(backend = %name, "backend recovered");
        }
        metrics.status = BackendStatus::Healthy;
        metrics.consecutive_failures = 0;
        metrics.record_response_time(response_time_secs);
    }

    /// Probe failed: bump the streak and demote Healthy backends once it
    /// crosses the threshold.
    pub fn record_probe_failure(&self, name: &str, error: &str, failure_threshold: u32) {
        let Some(backend) = self.get(name) else { return };
        let mut metrics = backend.metrics.lock().expect("metrics lock poisoned");
        metrics.consecutive_failures += 1;
        metrics.last_error = Some(error.to_string());
        metrics.last_check_time = Some(Utc::now());
        if metrics.consecutive_failures >= failure_threshold
            && metrics.status == BackendStatus::Healthy
        {
            metrics.status = BackendStatus::Unhealthy;
            tracing::warn!(
                backend = %name,
                failures = metrics.consecutive_failures,
                "backend marked unhealthy: {error}"
            );
        }
    }

    pub fn snapshot(&self, name: &str) -> Option<BackendSnapshot> {
        let backend = self.get(name)?;
        let config = BackendConfigView::from(&*backend.config.lock().expect("config lock poisoned"));
        let metrics = backend.metrics.lock().expect("metrics lock poisoned");
        Some(BackendSnapshot {
            config,
            metrics: MetricsSnapshot {
                status: metrics.status,
                total_requests: metrics.total_requests,
                successful_requests: metrics.successful_requests,
                failed_requests: metrics.failed_requests,
                active_connections: metrics.active_connections,
                average_response_time: metrics.average_response_time,
                success_rate: metrics.success_rate(),
                consecutive_failures: metrics.consecutive_failures,
                last_error: metrics.last_error.clone(),
                last_check_time: metrics.last_check_time,
            },
        })
    }

    /// Snapshots of every backend, keyed by name.
    pub fn snapshots(&self) -> BTreeMap<String, BackendSnapshot> {
        self.names()
            .into_iter()
            .filter_map(|name| self.snapshot(&name).map(|snap| (name, snap)))
            .collect()
    }
}
