//! The normalization pipeline.
//!
//! Two independent bounds govern throughput: a pool of conversion slots
//! (callers queue here first) and a smaller pool of transcoder workers
//! (one ffmpeg child each). The normalizer owns the temporary files it
//! creates only until it hands both paths back to the caller; it never
//! deletes them itself.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use lingualink_core::{Error, Result};
use serde::Serialize;
use tokio::sync::Semaphore;

use crate::format::{
    AudioFormat, CANONICAL_BITS_PER_SAMPLE, CANONICAL_CHANNELS, CANONICAL_SAMPLE_RATE,
};

const UPLOAD_PREFIX: &str = "lingualink_upload_";
const CONVERTED_PREFIX: &str = "lingualink_converted_";

/// Normalizer tuning.
#[derive(Debug, Clone)]
pub struct NormalizerConfig {
    /// Directory for temporary files; system temp dir when `None`.
    pub temp_dir: Option<PathBuf>,
    pub max_upload_size: usize,
    pub allowed_extensions: Vec<String>,
    /// Concurrent conversions admitted (callers block here first).
    pub conversion_slots: usize,
    /// Concurrent transcoder child processes.
    pub workers: usize,
    /// Transcoder binary.
    pub ffmpeg_path: String,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            temp_dir: None,
            max_upload_size: 16 * 1024 * 1024,
            allowed_extensions: ["wav", "opus", "ogg", "mp3", "flac", "m4a", "aac"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            conversion_slots: 10,
            workers: 5,
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }
}

/// Result of normalizing one upload.
///
/// `wav_path == original_path` when the upload was already compliant.
/// Ownership of both files transfers to the caller.
#[derive(Debug, Clone)]
pub struct NormalizedAudio {
    pub wav_path: PathBuf,
    pub original_path: PathBuf,
    pub elapsed: Duration,
}

impl NormalizedAudio {
    pub fn was_transcoded(&self) -> bool {
        self.wav_path != self.original_path
    }
}

/// Running conversion counters.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ConversionStats {
    pub active_conversions: usize,
    pub total_conversions: u64,
    pub total_wall_time_ms: u64,
}

/// Validates uploads and produces canonical waveforms.
pub struct AudioNormalizer {
    config: NormalizerConfig,
    slots: Semaphore,
    workers: Semaphore,
    active: AtomicUsize,
    total: AtomicU64,
    total_wall_ms: AtomicU64,
}

impl AudioNormalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        let slots = Semaphore::new(config.conversion_slots);
        let workers = Semaphore::new(config.workers);
        Self {
            config,
            slots,
            workers,
            active: AtomicUsize::new(0),
            total: AtomicU64::new(0),
            total_wall_ms: AtomicU64::new(0),
        }
    }

    /// Validate a declared filename and payload size against the
    /// allow-list and upload cap.
    pub fn validate(&self, filename: &str, size: usize) -> Result<AudioFormat> {
        if size == 0 {
            return Err(Error::InvalidUpload("empty file uploaded".to_string()));
        }
        if size > self.config.max_upload_size {
            let cap_mb = self.config.max_upload_size as f64 / (1024.0 * 1024.0);
            return Err(Error::InvalidUpload(format!(
                "file too large, maximum size is {cap_mb:.1}MB"
            )));
        }
        let ext = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .ok_or_else(|| Error::InvalidUpload("filename has no extension".to_string()))?;
        if !self.config.allowed_extensions.iter().any(|allowed| allowed == &ext) {
            return Err(Error::InvalidUpload(format!(
                "file type not allowed, allowed extensions: {}",
                self.config.allowed_extensions.join(", ")
            )));
        }
        AudioFormat::from_extension(&ext)
            .ok_or_else(|| Error::InvalidUpload(format!("file type not allowed: {ext}")))
    }

    /// Persist an upload and return the canonical WAV path plus the
    /// original path. Compliant WAV uploads skip transcoding, in which
    /// case both paths are equal.
    pub async fn normalize(&self, filename: &str, data: &[u8]) -> Result<NormalizedAudio> {
        let started = Instant::now();
        let format = self.validate(filename, data.len())?;

        let original_path = self.persist_upload(filename, data)?;
        tracing::debug!(
            path = %original_path.display(),
            bytes = data.len(),
            "upload saved"
        );

        if format == AudioFormat::Wav && is_compliant_wav(&original_path) {
            tracing::debug!(path = %original_path.display(), "already canonical wav");
            return Ok(NormalizedAudio {
                wav_path: original_path.clone(),
                original_path,
                elapsed: started.elapsed(),
            });
        }

        match self.transcode(format, &original_path).await {
            Ok(wav_path) => Ok(NormalizedAudio {
                wav_path,
                original_path,
                elapsed: started.elapsed(),
            }),
            Err(e) => {
                // The caller never saw the paths, so the upload is ours
                // to reap.
                remove_quietly(&original_path);
                Err(e)
            }
        }
    }

    /// Delete the canonical file iff it is distinct from the original.
    pub fn cleanup_canonical(&self, wav_path: &Path, original_path: &Path) {
        if wav_path != original_path {
            remove_quietly(wav_path);
        }
    }

    pub fn stats(&self) -> ConversionStats {
        ConversionStats {
            active_conversions: self.active.load(Ordering::Relaxed),
            total_conversions: self.total.load(Ordering::Relaxed),
            total_wall_time_ms: self.total_wall_ms.load(Ordering::Relaxed),
        }
    }

    fn persist_upload(&self, filename: &str, data: &[u8]) -> Result<PathBuf> {
        let safe_name = sanitize_filename(filename);
        let mut builder = tempfile::Builder::new();
        let suffix = format!("_{safe_name}");
        builder.prefix(UPLOAD_PREFIX).suffix(&suffix);
        let file = match &self.config.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        let (_, path) = file
            .keep()
            .map_err(|e| Error::Internal(format!("cannot persist upload: {e}")))?;
        if let Err(e) = std::fs::write(&path, data) {
            remove_quietly(&path);
            return Err(e.into());
        }
        Ok(path)
    }

    async fn transcode(&self, format: AudioFormat, input: &Path) -> Result<PathBuf> {
        // Admission first, worker second: queued callers do not hold a
        // worker while waiting.
        let _slot = self.slots.acquire().await.expect("slot semaphore closed");
        let _worker = self.workers.acquire().await.expect("worker semaphore closed");

        self.active.fetch_add(1, Ordering::Relaxed);
        let sequence = self.total.fetch_add(1, Ordering::Relaxed) + 1;
        let started = Instant::now();
        let result = self.run_transcoder(format, input).await;
        let elapsed = started.elapsed();
        self.active.fetch_sub(1, Ordering::Relaxed);
        self.total_wall_ms.fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);

        match &result {
            Ok(output) => tracing::info!(
                conversion = sequence,
                input = %input.display(),
                output = %output.display(),
                elapsed_ms = elapsed.as_millis() as u64,
                "transcode complete"
            ),
            Err(e) => tracing::warn!(
                conversion = sequence,
                input = %input.display(),
                "transcode failed: {e}"
            ),
        }
        result
    }

    async fn run_transcoder(&self, format: AudioFormat, input: &Path) -> Result<PathBuf> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(CONVERTED_PREFIX).suffix(".wav");
        let file = match &self.config.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        let (_, output) = file
            .keep()
            .map_err(|e| Error::Internal(format!("cannot create transcode target: {e}")))?;

        let args = build_transcode_args(format, input, &output);
        let spawned = tokio::process::Command::new(&self.config.ffmpeg_path)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await;

        let completed = match spawned {
            Ok(out) => out,
            Err(e) => {
                remove_quietly(&output);
                return Err(Error::TranscodeFailed(format!(
                    "cannot run {}: {e}",
                    self.config.ffmpeg_path
                )));
            }
        };

        if !completed.status.success() {
            remove_quietly(&output);
            let stderr = String::from_utf8_lossy(&completed.stderr);
            return Err(Error::TranscodeFailed(stderr.trim().to_string()));
        }

        let produced = std::fs::metadata(&output).map(|m| m.len() > 0).unwrap_or(false);
        if !produced {
            remove_quietly(&output);
            return Err(Error::TranscodeFailed("transcoder produced no output".to_string()));
        }

        Ok(output)
    }
}

/// Argument vector for one transcoder invocation. The output parameters
/// fix the canonical triple.
pub fn build_transcode_args(format: AudioFormat, input: &Path, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> =
        vec!["-y".into(), "-hide_banner".into(), "-loglevel".into(), "error".into()];
    args.extend(format.input_args().iter().map(OsString::from));
    args.push("-i".into());
    args.push(input.as_os_str().to_owned());
    args.push("-ar".into());
    args.push(CANONICAL_SAMPLE_RATE.to_string().into());
    args.push("-ac".into());
    args.push(CANONICAL_CHANNELS.to_string().into());
    args.extend(["-sample_fmt", "s16", "-f", "wav"].map(OsString::from));
    args.push(output.as_os_str().to_owned());
    args
}

/// True when the WAV header already matches the canonical triple.
fn is_compliant_wav(path: &Path) -> bool {
    match hound::WavReader::open(path) {
        Ok(reader) => {
            let spec = reader.spec();
            spec.sample_rate == CANONICAL_SAMPLE_RATE
                && spec.channels == CANONICAL_CHANNELS
                && spec.bits_per_sample == CANONICAL_BITS_PER_SAMPLE
                && spec.sample_format == hound::SampleFormat::Int
        }
        Err(_) => false,
    }
}

/// Keep only the terminal path component, with a conservative character
/// set, so a hostile declared filename cannot escape the temp dir.
fn sanitize_filename(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    if cleaned.trim_matches(['.', '_']).is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), "temp file cleanup failed: {e}");
        }
    }
}
