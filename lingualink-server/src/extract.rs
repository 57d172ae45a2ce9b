//! Credential extraction from request headers.

use axum::http::HeaderMap;

/// Pull the presented credential out of the headers.
///
/// `X-API-Key` takes precedence; `Authorization: Bearer <secret>` is the
/// equivalent fallback.
pub fn extract_credential(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
        .map(|token| token.to_string())
}
