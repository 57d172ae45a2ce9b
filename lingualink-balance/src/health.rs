//! Periodic backend liveness probing.
//!
//! One background task owns the whole schedule: each tick it fans a
//! probe out to every registered backend concurrently and feeds the
//! results into the registry's state machine. The probe timeout is fixed
//! at ten seconds regardless of the backend's request timeout, so prober
//! latency stays decoupled from application traffic latency.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lingualink_core::{Error, Result};

use crate::registry::{BackendRegistry, BackendStatus};

/// Fixed HTTP timeout for probes.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Prober tuning.
#[derive(Debug, Clone)]
pub struct ProberConfig {
    pub interval: Duration,
    pub failure_threshold: u32,
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self { interval: Duration::from_secs(30), failure_threshold: 3 }
    }
}

/// Drives the backend health state machine.
pub struct HealthProber {
    registry: Arc<BackendRegistry>,
    client: reqwest::Client,
    interval: Mutex<Duration>,
    failure_threshold: AtomicU32,
    running: AtomicBool,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl HealthProber {
    pub fn new(registry: Arc<BackendRegistry>, config: ProberConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .map_err(|e| Error::Internal(format!("probe client: {e}")))?;
        Ok(Self {
            registry,
            client,
            interval: Mutex::new(config.interval),
            failure_threshold: AtomicU32::new(config.failure_threshold),
            running: AtomicBool::new(false),
            task: Mutex::new(None),
        })
    }

    pub fn interval(&self) -> Duration {
        *self.interval.lock().expect("prober lock poisoned")
    }

    /// Takes effect on the next tick.
    pub fn set_interval(&self, interval: Duration) {
        *self.interval.lock().expect("prober lock poisoned") = interval;
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold.load(Ordering::Relaxed)
    }

    pub fn set_failure_threshold(&self, threshold: u32) {
        self.failure_threshold.store(threshold, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Start the probe loop. Returns `false` when it was already running.
    pub fn start(self: &Arc<Self>) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            return false;
        }
        let prober = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                let interval = prober.interval();
                tokio::time::sleep(interval).await;
                if !prober.running.load(Ordering::Relaxed) {
                    break;
                }
                prober.probe_all().await;
            }
        });
        *self.task.lock().expect("prober lock poisoned") = Some(handle);
        tracing::info!("health probe loop started");
        true
    }

    /// Stop the probe loop. Returns `false` when it was not running.
    pub fn stop(&self) -> bool {
        if !self.running.swap(false, Ordering::SeqCst) {
            return false;
        }
        if let Some(handle) = self.task.lock().expect("prober lock poisoned").take() {
            handle.abort();
        }
        tracing::info!("health probe loop stopped");
        true
    }

    /// Probe every registered backend concurrently.
    pub async fn probe_all(&self) {
        let names = self.registry.names();
        let probes = names.iter().map(|name| self.probe_backend(name));
        futures::future::join_all(probes).await;
    }

    /// Probe one backend synchronously and return its resulting status.
    /// Errors only when the backend is not registered.
    pub async fn probe_one(&self, name: &str) -> Result<BackendStatus> {
        if !self.registry.contains(name) {
            return Err(Error::Internal(format!("unknown backend {name:?}")));
        }
        self.probe_backend(name).await;
        self.registry
            .status(name)
            .ok_or_else(|| Error::Internal(format!("unknown backend {name:?}")))
    }

    async fn probe_backend(&self, name: &str) {
        let Some(config) = self.registry.config(name) else { return };
        let url = format!("{}/v1/models", config.url.trim_end_matches('/'));
        let started = Instant::now();

        let outcome = self
            .client
            .get(&url)
            .bearer_auth(&config.api_key)
            .send()
            .await;

        match outcome {
            Ok(response) if response.status().is_success() => {
                let elapsed = started.elapsed().as_secs_f64();
                tracing::debug!(backend = %name, elapsed_secs = elapsed, "probe ok");
                self.registry.record_probe_success(name, elapsed);
            }
            Ok(response) => {
                let error = format!("HTTP {}", response.status().as_u16());
                self.registry.record_probe_failure(name, &error, self.failure_threshold());
            }
            Err(e) => {
                self.registry
                    .record_probe_failure(name, &e.to_string(), self.failure_threshold());
            }
        }
    }
}

impl Drop for HealthProber {
    fn drop(&mut self) {
        if let Some(handle) = self.task.lock().expect("prober lock poisoned").take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lingualink_core::BackendConfig;

    fn registry(urls: &[(&str, &str)]) -> Arc<BackendRegistry> {
        Arc::new(BackendRegistry::new(
            urls.iter()
                .map(|(name, url)| BackendConfig::new(*name, *url, "model", "key"))
                .collect(),
        ))
    }

    #[tokio::test]
    async fn start_and_stop_flip_exactly_once() {
        let prober = Arc::new(
            HealthProber::new(registry(&[]), ProberConfig::default()).unwrap(),
        );
        assert!(!prober.is_running());
        assert!(prober.start());
        assert!(!prober.start());
        assert!(prober.is_running());
        assert!(prober.stop());
        assert!(!prober.stop());
        assert!(!prober.is_running());
    }

    #[tokio::test]
    async fn probe_one_rejects_unknown_backends() {
        let prober =
            HealthProber::new(registry(&[]), ProberConfig::default()).unwrap();
        assert!(prober.probe_one("ghost").await.is_err());
    }

    #[tokio::test]
    async fn runtime_tuning_is_visible() {
        let prober =
            HealthProber::new(registry(&[]), ProberConfig::default()).unwrap();
        assert_eq!(prober.interval(), Duration::from_secs(30));
        assert_eq!(prober.failure_threshold(), 3);
        prober.set_interval(Duration::from_secs(5));
        prober.set_failure_threshold(1);
        assert_eq!(prober.interval(), Duration::from_secs(5));
        assert_eq!(prober.failure_threshold(), 1);
    }
}
