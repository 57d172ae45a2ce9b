//! Application context: every long-lived service, built once.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use lingualink_audio::{AudioNormalizer, NormalizerConfig};
use lingualink_auth::{CachedKeyVerifier, KeyStore, MokaVerifyCache, VerifyCache};
use lingualink_balance::{
    BackendRegistry, HealthProber, ProberConfig, Selector, Strategy,
};
use lingualink_core::{Result, Settings};

use crate::dispatcher::{Dispatcher, DispatcherConfig};
use crate::operator::Operator;

/// The gateway's service graph.
///
/// Constructed once at startup and threaded into every handler; tests
/// build one from a [`Settings`] value pointing at fixtures. There is no
/// process-global state behind this.
pub struct AppContext {
    pub settings: Settings,
    pub verifier: Arc<CachedKeyVerifier>,
    pub normalizer: Arc<AudioNormalizer>,
    pub registry: Arc<BackendRegistry>,
    pub selector: Arc<Selector>,
    pub prober: Arc<HealthProber>,
    pub dispatcher: Arc<Dispatcher>,
    pub operator: Arc<Operator>,
}

impl AppContext {
    /// Wire the full service graph from validated settings.
    pub fn from_settings(settings: Settings) -> Result<Arc<Self>> {
        settings.validate()?;

        let store = Arc::new(KeyStore::open(&settings.database_path)?);
        let cache: Option<Arc<dyn VerifyCache>> = if settings.cache_enabled {
            Some(Arc::new(MokaVerifyCache::new(Duration::from_secs(settings.cache_ttl_secs))))
        } else {
            None
        };
        let verifier = Arc::new(CachedKeyVerifier::new(
            store,
            cache,
            settings.auth_enabled,
            Duration::from_secs(settings.cache_ttl_secs),
        ));

        let normalizer = Arc::new(AudioNormalizer::new(NormalizerConfig {
            temp_dir: settings.temp_dir.clone(),
            max_upload_size: settings.max_upload_size,
            allowed_extensions: settings.allowed_extensions.clone(),
            conversion_slots: settings.max_concurrent_conversions,
            workers: settings.converter_workers,
            ffmpeg_path: "ffmpeg".to_string(),
        }));

        let backends = settings.effective_backends();
        let single_backend = if settings.is_load_balance_enabled() {
            None
        } else {
            Some(backends[0].name.clone())
        };

        let registry = Arc::new(BackendRegistry::new(backends));
        let strategy = Strategy::from_str(&settings.load_balance_strategy)?;
        let selector = Arc::new(Selector::new(Arc::clone(&registry), strategy));
        let prober = Arc::new(HealthProber::new(
            Arc::clone(&registry),
            ProberConfig {
                interval: Duration::from_secs(settings.health_check_interval_secs),
                failure_threshold: settings.failure_threshold,
            },
        )?);

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&verifier),
            Arc::clone(&normalizer),
            Arc::clone(&registry),
            Arc::clone(&selector),
            DispatcherConfig {
                max_retries: settings.max_retries,
                default_target_languages: settings.default_target_languages.clone(),
                default_user_query: settings.default_user_query.clone(),
                max_tokens: settings.max_tokens,
                temperature: settings.temperature,
                single_backend,
            },
        )?);

        let operator = Arc::new(Operator::new(
            Arc::clone(&registry),
            Arc::clone(&selector),
            Arc::clone(&prober),
            Arc::clone(&verifier),
            Arc::clone(&normalizer),
            Arc::clone(&dispatcher),
        ));

        Ok(Arc::new(Self {
            settings,
            verifier,
            normalizer,
            registry,
            selector,
            prober,
            dispatcher,
            operator,
        }))
    }
}
