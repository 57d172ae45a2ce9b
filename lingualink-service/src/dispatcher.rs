//! Per-request orchestration.
//!
//! One [`Dispatcher::handle`] call runs the whole data path: verify the
//! credential, normalize the upload, build the prompt, then loop
//! select → call → account until a backend answers or the attempt
//! budget is spent. Two drop guards hold the invariants the loop must
//! not break: every temp file is reaped on every exit path, and every
//! selected connection slot is released exactly once per attempt.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use lingualink_audio::AudioNormalizer;
use lingualink_auth::{CachedKeyVerifier, Verification};
use lingualink_balance::{BackendRegistry, Selector};
use lingualink_core::{parse_reply, Error, Result};
use tokio::time::Instant;

use crate::prompt::build_system_prompt;
use crate::upstream::{ChatClient, ChatRequest};

/// Dispatcher tuning.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Additional attempts after the first (total = max_retries + 1).
    pub max_retries: u32,
    pub default_target_languages: Vec<String>,
    pub default_user_query: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Backend name to target directly in single-backend mode; `None`
    /// routes through the selector.
    pub single_backend: Option<String>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            default_target_languages: vec!["英文".to_string(), "日文".to_string()],
            default_user_query: "请处理下面的音频。".to_string(),
            max_tokens: 200,
            temperature: 0.0,
            single_backend: None,
        }
    }
}

/// A client upload as handed over by the HTTP boundary.
#[derive(Debug, Clone)]
pub struct AudioUpload {
    pub filename: String,
    pub data: Vec<u8>,
}

/// One transcription request.
#[derive(Debug, Clone, Default)]
pub struct DispatchRequest {
    pub user_prompt: Option<String>,
    pub target_languages: Option<Vec<String>>,
    /// Key for the consistent-hash selector.
    pub request_key: Option<String>,
    /// Per-request deadline across all attempts.
    pub deadline: Option<Duration>,
}

/// Successful outcome: the parsed sections plus serving metadata.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub backend: String,
    pub duration_seconds: f64,
    pub sections: HashMap<String, String>,
}

/// Drives one request through normalize → select → call → account.
pub struct Dispatcher {
    verifier: Arc<CachedKeyVerifier>,
    normalizer: Arc<AudioNormalizer>,
    registry: Arc<BackendRegistry>,
    selector: Arc<Selector>,
    client: ChatClient,
    config: DispatcherConfig,
    max_retries: AtomicU32,
}

impl Dispatcher {
    pub fn new(
        verifier: Arc<CachedKeyVerifier>,
        normalizer: Arc<AudioNormalizer>,
        registry: Arc<BackendRegistry>,
        selector: Arc<Selector>,
        config: DispatcherConfig,
    ) -> Result<Self> {
        let client = ChatClient::new()?;
        let max_retries = AtomicU32::new(config.max_retries);
        Ok(Self { verifier, normalizer, registry, selector, client, config, max_retries })
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries.load(Ordering::Relaxed)
    }

    /// Operator-adjustable at runtime.
    pub fn set_max_retries(&self, retries: u32) {
        self.max_retries.store(retries, Ordering::Relaxed);
    }

    pub fn single_backend(&self) -> Option<&str> {
        self.config.single_backend.as_deref()
    }

    /// Handle one upload end to end.
    pub async fn handle(
        &self,
        upload: AudioUpload,
        request: DispatchRequest,
        credential: Option<&str>,
    ) -> Result<DispatchOutcome> {
        self.authenticate(credential).await?;

        let normalized = self.normalizer.normalize(&upload.filename, &upload.data).await?;
        let _temp_guard = TempFileGuard {
            normalizer: Arc::clone(&self.normalizer),
            wav: normalized.wav_path.clone(),
            original: normalized.original_path.clone(),
        };

        let target_languages = self.resolve_target_languages(request.target_languages);
        let system_prompt = build_system_prompt(&target_languages);
        let user_prompt =
            request.user_prompt.unwrap_or_else(|| self.config.default_user_query.clone());

        let audio = tokio::fs::read(&normalized.wav_path).await?;
        let audio_base64 = base64::engine::general_purpose::STANDARD.encode(audio);

        self.attempt_loop(
            &system_prompt,
            &user_prompt,
            audio_base64,
            request.request_key.as_deref(),
            request.deadline,
        )
        .await
    }

    async fn authenticate(&self, credential: Option<&str>) -> Result<Verification> {
        let verification = match credential {
            Some(secret) => self.verifier.verify(secret).await?,
            None if self.verifier.auth_enabled() => {
                return Err(Error::Unauthorized("API key is required".to_string()));
            }
            None => Verification { valid: true, admin: false },
        };
        if !verification.valid {
            return Err(Error::Unauthorized("invalid or expired API key".to_string()));
        }
        Ok(verification)
    }

    fn resolve_target_languages(&self, requested: Option<Vec<String>>) -> Vec<String> {
        let cleaned: Vec<String> = requested
            .unwrap_or_default()
            .into_iter()
            .map(|lang| lang.trim().to_string())
            .filter(|lang| !lang.is_empty())
            .collect();
        if cleaned.is_empty() {
            self.config.default_target_languages.clone()
        } else {
            cleaned
        }
    }

    async fn attempt_loop(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        audio_base64: String,
        request_key: Option<&str>,
        deadline: Option<Duration>,
    ) -> Result<DispatchOutcome> {
        let total_attempts = self.max_retries() + 1;
        let expires_at = deadline.map(|d| Instant::now() + d);
        let mut last_failure: Option<(String, Error)> = None;

        for attempt in 0..total_attempts {
            let backend_name = self.pick_backend(request_key)?;
            let _slot = ConnectionGuard {
                registry: Arc::clone(&self.registry),
                backend: backend_name.clone(),
            };

            let Some(backend) = self.registry.config(&backend_name) else {
                // Removed between selection and lookup; treat as a failed
                // attempt against it.
                last_failure = Some((
                    backend_name.clone(),
                    Error::Upstream {
                        message: "backend vanished during dispatch".to_string(),
                        status: None,
                        body: None,
                    },
                ));
                continue;
            };

            let chat_request = ChatRequest::audio(
                backend.model_name.clone(),
                system_prompt,
                user_prompt,
                audio_base64.clone(),
                self.config.max_tokens,
                self.config.temperature,
            );

            let started = Instant::now();
            let outcome = match expires_at {
                Some(at) => {
                    let remaining = at.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        Err(Error::Timeout("request deadline exceeded".to_string()))
                    } else {
                        match tokio::time::timeout(
                            remaining,
                            self.client.chat_completion(&backend, &chat_request),
                        )
                        .await
                        {
                            Ok(result) => result,
                            Err(_) => {
                                Err(Error::Timeout("request deadline exceeded".to_string()))
                            }
                        }
                    }
                }
                None => self.client.chat_completion(&backend, &chat_request).await,
            };
            let elapsed = started.elapsed().as_secs_f64();

            match outcome {
                Ok(reply) => {
                    self.registry.record_result(&backend_name, true, elapsed, None);
                    tracing::info!(
                        backend = %backend_name,
                        attempt,
                        elapsed_secs = elapsed,
                        "dispatch succeeded"
                    );
                    return Ok(DispatchOutcome {
                        backend: backend_name,
                        duration_seconds: elapsed,
                        sections: parse_reply(&reply),
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        backend = %backend_name,
                        attempt,
                        total_attempts,
                        "dispatch attempt failed: {e}"
                    );
                    self.registry.record_result(&backend_name, false, 0.0, Some(&e.to_string()));
                    last_failure = Some((backend_name, e));
                }
            }
        }

        match last_failure {
            // A single configured attempt surfaces the upstream error as is.
            Some((_, e)) if total_attempts == 1 => Err(e),
            Some((backend, e)) => {
                Err(Error::AllBackendsFailed { backend, message: e.to_string() })
            }
            None => Err(Error::NoBackend),
        }
    }

    fn pick_backend(&self, request_key: Option<&str>) -> Result<String> {
        match &self.config.single_backend {
            Some(name) => {
                if self.registry.status(name).is_none() {
                    return Err(Error::NoBackend);
                }
                if !self.registry.try_acquire(name) {
                    return Err(Error::NoBackend);
                }
                Ok(name.clone())
            }
            None => self.selector.select(request_key),
        }
    }
}

/// Releases one connection slot on drop.
struct ConnectionGuard {
    registry: Arc<BackendRegistry>,
    backend: String,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.release(&self.backend);
    }
}

/// Reaps the request's temp files on drop: the canonical file when it
/// differs from the original, the original unconditionally.
struct TempFileGuard {
    normalizer: Arc<AudioNormalizer>,
    wav: PathBuf,
    original: PathBuf,
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        self.normalizer.cleanup_canonical(&self.wav, &self.original);
        remove_quietly(&self.original);
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), "temp file cleanup failed: {e}");
        }
    }
}
