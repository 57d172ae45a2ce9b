//! The JSON response envelope and the error → status-code mapping.

use axum::http::StatusCode;
use axum::Json;
use lingualink_core::Error;
use serde::Serialize;
use serde_json::Value;

/// Uniform response body: `{status, message?, data?, details?}`.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl Envelope {
    pub fn success(data: impl Serialize) -> Json<Self> {
        Json(Self {
            status: "success",
            message: None,
            data: serde_json::to_value(data).ok(),
            details: None,
        })
    }

    pub fn success_message(message: impl Into<String>) -> Json<Self> {
        Json(Self { status: "success", message: Some(message.into()), data: None, details: None })
    }

    pub fn error(message: impl Into<String>, details: Option<Value>) -> Self {
        Self { status: "error", message: Some(message.into()), data: None, details }
    }
}

/// Map a service error onto an HTTP rejection.
///
/// Internal details are only exposed in the body when debug mode is on.
pub fn reject(err: Error, debug: bool) -> (StatusCode, Json<Envelope>) {
    let status = match &err {
        Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        Error::Forbidden(_) => StatusCode::FORBIDDEN,
        Error::InvalidUpload(message) if message.starts_with("file too large") => {
            StatusCode::PAYLOAD_TOO_LARGE
        }
        Error::InvalidUpload(_) | Error::UnsupportedFormat(_) | Error::Config(_) => {
            StatusCode::BAD_REQUEST
        }
        Error::NoBackend => StatusCode::SERVICE_UNAVAILABLE,
        Error::AllBackendsFailed { .. } | Error::Upstream { .. } => StatusCode::BAD_GATEWAY,
        Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        Error::TranscodeFailed(_) | Error::Store(_) | Error::Io(_) | Error::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    let message = if status == StatusCode::INTERNAL_SERVER_ERROR && !debug {
        "internal server error".to_string()
    } else {
        err.to_string()
    };
    let details = if debug || status != StatusCode::INTERNAL_SERVER_ERROR {
        err.details()
    } else {
        None
    };

    (status, Json(Envelope::error(message, details)))
}
