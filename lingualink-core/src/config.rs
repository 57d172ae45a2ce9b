//! Typed gateway configuration.
//!
//! Settings are deserialized from a JSON file, then overridden by
//! environment variables. Unknown fields are ignored; a malformed value
//! or an unrecognized strategy name fails startup with the offending
//! field named.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// The selection strategy names the selector understands.
pub const STRATEGY_NAMES: &[&str] = &[
    "round_robin",
    "weighted_round_robin",
    "least_connections",
    "random",
    "consistent_hash",
    "response_time",
];

/// Configuration of one upstream inference endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Unique backend id.
    pub name: String,
    /// Base URL of the OpenAI-compatible endpoint.
    pub url: String,
    /// Model identifier passed in each request.
    pub model_name: String,
    /// Upstream credential (bearer token).
    pub api_key: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Per-request timeout in seconds.
    #[serde(default = "default_backend_timeout")]
    pub timeout: f64,
    /// Lower value = higher priority.
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_weight() -> u32 {
    1
}

fn default_max_connections() -> u32 {
    50
}

fn default_backend_timeout() -> f64 {
    30.0
}

impl BackendConfig {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        model_name: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            model_name: model_name.into(),
            api_key: api_key.into(),
            weight: default_weight(),
            max_connections: default_max_connections(),
            timeout: default_backend_timeout(),
            priority: 0,
            tags: Vec::new(),
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_timeout(mut self, timeout: f64) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Application settings with the gateway's defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Server
    pub host: String,
    pub port: u16,
    pub debug: bool,

    // Uploads
    pub max_upload_size: usize,
    pub allowed_extensions: Vec<String>,

    // Audio normalization
    pub max_concurrent_conversions: usize,
    pub converter_workers: usize,
    /// Directory for temporary audio files; system temp dir when unset.
    pub temp_dir: Option<PathBuf>,

    // Authentication
    pub auth_enabled: bool,
    pub cache_enabled: bool,
    pub cache_ttl_secs: u64,
    pub database_path: PathBuf,

    // Prompting
    pub default_target_languages: Vec<String>,
    pub default_user_query: String,
    pub max_tokens: u32,
    pub temperature: f32,

    // Single-backend fields (used when no backend list is configured)
    pub backend_url: String,
    pub model_name: String,
    pub backend_api_key: String,

    // Multi-backend pool
    pub llm_backends: Option<Vec<BackendConfig>>,
    /// Explicit multi-backend switch; unset means auto-detect.
    pub load_balance_enabled: Option<bool>,
    pub load_balance_strategy: String,
    pub health_check_interval_secs: u64,
    pub max_retries: u32,
    pub failure_threshold: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            debug: false,
            max_upload_size: 16 * 1024 * 1024,
            allowed_extensions: ["wav", "opus", "ogg", "mp3", "flac", "m4a", "aac"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_concurrent_conversions: 10,
            converter_workers: 5,
            temp_dir: None,
            auth_enabled: true,
            cache_enabled: false,
            cache_ttl_secs: 300,
            database_path: PathBuf::from("data/api_keys.db"),
            default_target_languages: vec!["英文".to_string(), "日文".to_string()],
            default_user_query: "请处理下面的音频。".to_string(),
            max_tokens: 200,
            temperature: 0.0,
            backend_url: "http://127.0.0.1:8000".to_string(),
            model_name: "qwenOmni7".to_string(),
            backend_api_key: String::new(),
            llm_backends: None,
            load_balance_enabled: None,
            load_balance_strategy: "round_robin".to_string(),
            health_check_interval_secs: 30,
            max_retries: 2,
            failure_threshold: 3,
        }
    }
}

impl Settings {
    /// Load settings from a JSON file, apply environment overrides, and
    /// validate.
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let mut settings: Settings = serde_json::from_str(&contents)
            .map_err(|e| Error::Config(format!("{}: {e}", path.as_ref().display())))?;
        settings.apply_env();
        settings.validate()?;
        Ok(settings)
    }

    /// Build settings from defaults plus environment variables.
    pub fn from_env() -> Result<Self> {
        let mut settings = Settings::default();
        settings.apply_env();
        settings.validate()?;
        Ok(settings)
    }

    fn apply_env(&mut self) {
        env_string("HOST", &mut self.host);
        env_parse("PORT", &mut self.port);
        env_parse("DEBUG", &mut self.debug);
        env_parse("MAX_UPLOAD_SIZE", &mut self.max_upload_size);
        env_list("ALLOWED_EXTENSIONS", &mut self.allowed_extensions);
        env_parse("MAX_CONCURRENT_AUDIO_CONVERSIONS", &mut self.max_concurrent_conversions);
        env_parse("AUDIO_CONVERTER_WORKERS", &mut self.converter_workers);
        env_parse("AUTH_ENABLED", &mut self.auth_enabled);
        env_parse("CACHE_ENABLED", &mut self.cache_enabled);
        env_parse("API_KEY_CACHE_TTL", &mut self.cache_ttl_secs);
        if let Ok(v) = std::env::var("DATABASE_PATH") {
            self.database_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("TEMP_DIR") {
            self.temp_dir = Some(PathBuf::from(v));
        }
        env_list("DEFAULT_TARGET_LANGUAGES", &mut self.default_target_languages);
        env_string("DEFAULT_USER_QUERY", &mut self.default_user_query);
        env_string("BACKEND_URL", &mut self.backend_url);
        env_string("MODEL_NAME", &mut self.model_name);
        env_string("BACKEND_API_KEY", &mut self.backend_api_key);
        if let Ok(v) = std::env::var("LLM_BACKENDS") {
            match serde_json::from_str::<Vec<BackendConfig>>(&v) {
                Ok(list) => self.llm_backends = Some(list),
                Err(e) => tracing::warn!("ignoring malformed LLM_BACKENDS: {e}"),
            }
        }
        if let Ok(v) = std::env::var("LOAD_BALANCE_ENABLED") {
            if let Ok(flag) = v.parse::<bool>() {
                self.load_balance_enabled = Some(flag);
            }
        }
        env_string("LOAD_BALANCE_STRATEGY", &mut self.load_balance_strategy);
        env_parse("HEALTH_CHECK_INTERVAL", &mut self.health_check_interval_secs);
        env_parse("MAX_RETRIES", &mut self.max_retries);
        env_parse("FAILURE_THRESHOLD", &mut self.failure_threshold);
    }

    pub fn validate(&self) -> Result<()> {
        if !STRATEGY_NAMES.contains(&self.load_balance_strategy.as_str()) {
            return Err(Error::Config(format!(
                "load_balance_strategy must be one of {STRATEGY_NAMES:?}, got {:?}",
                self.load_balance_strategy
            )));
        }
        if self.max_concurrent_conversions == 0 {
            return Err(Error::Config(
                "max_concurrent_conversions must be positive".to_string(),
            ));
        }
        if self.converter_workers == 0 {
            return Err(Error::Config("converter_workers must be positive".to_string()));
        }
        if let Some(backends) = &self.llm_backends {
            let mut seen = HashSet::new();
            for backend in backends {
                if backend.name.is_empty() {
                    return Err(Error::Config("llm_backends[].name must not be empty".to_string()));
                }
                if backend.url.is_empty() {
                    return Err(Error::Config(format!(
                        "llm_backends[{}].url must not be empty",
                        backend.name
                    )));
                }
                if backend.weight == 0 {
                    return Err(Error::Config(format!(
                        "llm_backends[{}].weight must be positive",
                        backend.name
                    )));
                }
                if !seen.insert(backend.name.clone()) {
                    return Err(Error::Config(format!(
                        "duplicate backend name {:?}",
                        backend.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Whether the gateway runs the multi-backend pool. Explicit switch
    /// wins; otherwise auto-enabled when more than one backend is listed.
    pub fn is_load_balance_enabled(&self) -> bool {
        match self.load_balance_enabled {
            Some(flag) => flag,
            None => self.llm_backends.as_ref().is_some_and(|b| b.len() > 1),
        }
    }

    /// The backend pool to register: the configured list when present,
    /// otherwise one backend synthesized from the single-backend fields.
    pub fn effective_backends(&self) -> Vec<BackendConfig> {
        match &self.llm_backends {
            Some(list) if !list.is_empty() => list.clone(),
            _ => vec![BackendConfig::new(
                "default",
                self.backend_url.clone(),
                self.model_name.clone(),
                self.backend_api_key.clone(),
            )],
        }
    }
}

fn env_string(key: &str, slot: &mut String) {
    if let Ok(v) = std::env::var(key) {
        *slot = v;
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, slot: &mut T) {
    if let Ok(v) = std::env::var(key) {
        match v.parse::<T>() {
            Ok(parsed) => *slot = parsed,
            Err(_) => tracing::warn!("ignoring malformed {key}={v:?}"),
        }
    }
}

/// Lists come either as a JSON array or as a comma-separated string.
fn env_list(key: &str, slot: &mut Vec<String>) {
    if let Ok(v) = std::env::var(key) {
        if let Ok(parsed) = serde_json::from_str::<Vec<String>>(&v) {
            *slot = parsed;
        } else {
            *slot = v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let settings = Settings::default();
        assert_eq!(settings.port, 5000);
        assert_eq!(settings.max_upload_size, 16 * 1024 * 1024);
        assert_eq!(settings.cache_ttl_secs, 300);
        assert_eq!(settings.max_retries, 2);
        assert_eq!(settings.failure_threshold, 3);
        assert_eq!(settings.health_check_interval_secs, 30);
        assert_eq!(settings.load_balance_strategy, "round_robin");
        assert_eq!(settings.default_target_languages, vec!["英文", "日文"]);
        assert!(settings.auth_enabled);
        assert!(!settings.cache_enabled);
        settings.validate().unwrap();
    }

    #[test]
    fn backend_list_wins_over_single_fields() {
        let mut settings = Settings::default();
        settings.backend_url = "http://single:8000".to_string();
        settings.llm_backends = Some(vec![
            BackendConfig::new("a", "http://a:8000", "m", "k"),
            BackendConfig::new("b", "http://b:8000", "m", "k"),
        ]);
        let backends = settings.effective_backends();
        assert_eq!(backends.len(), 2);
        assert_eq!(backends[0].name, "a");
        assert!(settings.is_load_balance_enabled());
    }

    #[test]
    fn single_backend_synthesized_when_list_missing() {
        let settings = Settings::default();
        let backends = settings.effective_backends();
        assert_eq!(backends.len(), 1);
        assert_eq!(backends[0].name, "default");
        assert_eq!(backends[0].weight, 1);
        assert_eq!(backends[0].max_connections, 50);
        assert!(!settings.is_load_balance_enabled());
    }

    #[test]
    fn explicit_switch_overrides_auto_detection() {
        let mut settings = Settings::default();
        settings.llm_backends = Some(vec![
            BackendConfig::new("a", "http://a:8000", "m", "k"),
            BackendConfig::new("b", "http://b:8000", "m", "k"),
        ]);
        settings.load_balance_enabled = Some(false);
        assert!(!settings.is_load_balance_enabled());
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        let mut settings = Settings::default();
        settings.load_balance_strategy = "fastest_first".to_string();
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("load_balance_strategy"));
    }

    #[test]
    fn duplicate_backend_names_are_rejected() {
        let mut settings = Settings::default();
        settings.llm_backends = Some(vec![
            BackendConfig::new("a", "http://a:8000", "m", "k"),
            BackendConfig::new("a", "http://b:8000", "m", "k"),
        ]);
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate backend name"));
    }

    #[test]
    fn zero_weight_is_rejected() {
        let mut settings = Settings::default();
        settings.llm_backends =
            Some(vec![BackendConfig::new("a", "http://a:8000", "m", "k").with_weight(0)]);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn load_ignores_unknown_fields_and_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"port": 8080, "some_future_knob": true, "llm_backends": [
                {{"name": "a", "url": "http://a:8000", "model_name": "m", "api_key": "k"}}
            ]}}"#
        )
        .unwrap();
        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.port, 8080);
        assert_eq!(settings.host, "0.0.0.0");
        let backends = settings.effective_backends();
        assert_eq!(backends[0].timeout, 30.0);
    }

    #[test]
    fn load_reports_malformed_file_with_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = Settings::load(file.path()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
