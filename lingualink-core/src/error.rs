use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Gateway error taxonomy.
///
/// Every failure surfaced to a caller is one of these kinds. The HTTP
/// boundary maps them onto status codes; internally they are produced at
/// the seam where a lower-level failure (SQLite, ffmpeg, reqwest) is
/// classified.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing, invalid, or expired credential.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Credential is valid but lacks the admin flag.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Empty, missing, unknown extension, or oversized upload.
    #[error("invalid upload: {0}")]
    InvalidUpload(String),

    /// Extension accepted but the transcoder refused the content.
    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// Transcoder crashed or produced no output.
    #[error("transcode failed: {0}")]
    TranscodeFailed(String),

    /// No healthy backend with spare capacity.
    #[error("no available backend")]
    NoBackend,

    /// Every attempt against a healthy backend raised.
    #[error("all backends failed (last: {backend}): {message}")]
    AllBackendsFailed { backend: String, message: String },

    /// Terminal single-attempt upstream error (retries disabled).
    #[error("upstream error: {message}")]
    Upstream {
        message: String,
        status: Option<u16>,
        body: Option<serde_json::Value>,
    },

    /// Per-request deadline exceeded during an attempt.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Invalid or incomplete configuration at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Credential store failure.
    #[error("store error: {0}")]
    Store(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for unexpected failures; details are only exposed to
    /// clients when debug mode is on.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Structured detail payload for error envelopes, when one exists.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::AllBackendsFailed { backend, message } => Some(serde_json::json!({
                "backend": backend,
                "error": message,
            })),
            Error::Upstream { status, body, .. } => Some(serde_json::json!({
                "status_code": status,
                "body": body,
            })),
            _ => None,
        }
    }

    /// True for the kinds the dispatcher may retry on a fresh backend.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Upstream { .. } | Error::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_errors_are_retryable() {
        let err = Error::Upstream { message: "503".into(), status: Some(503), body: None };
        assert!(err.is_retryable());
        assert!(Error::Timeout("deadline".into()).is_retryable());
        assert!(!Error::InvalidUpload("empty".into()).is_retryable());
        assert!(!Error::Unauthorized("bad key".into()).is_retryable());
    }

    #[test]
    fn all_backends_failed_carries_details() {
        let err = Error::AllBackendsFailed { backend: "vllm-a".into(), message: "boom".into() };
        let details = err.details().unwrap();
        assert_eq!(details["backend"], "vllm-a");
        assert_eq!(details["error"], "boom");
    }
}
