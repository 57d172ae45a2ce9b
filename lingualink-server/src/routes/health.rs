//! Liveness and service-status routes.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;

use super::{require_key, Rejection};
use crate::envelope::Envelope;
use crate::state::ServerState;

/// `GET /api/v1/health`
pub async fn health(State(state): State<ServerState>) -> Json<Envelope> {
    Envelope::success(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.uptime_secs(),
    }))
}

/// `GET /api/v1/ping`
pub async fn ping() -> Json<Envelope> {
    Envelope::success(serde_json::json!({
        "message": "pong",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// `GET /api/v1/status`
pub async fn status(State(state): State<ServerState>) -> Json<Envelope> {
    let settings = &state.context.settings;
    Envelope::success(serde_json::json!({
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.uptime_secs(),
        "config": {
            "auth_enabled": settings.auth_enabled,
            "cache_enabled": settings.cache_enabled,
            "max_upload_size_mb": settings.max_upload_size / (1024 * 1024),
            "allowed_extensions": settings.allowed_extensions,
            "default_target_languages": settings.default_target_languages,
            "load_balance_enabled": settings.is_load_balance_enabled(),
            "strategy": settings.load_balance_strategy,
        },
    }))
}

/// `GET /api/v1/performance` — conversion and pool counters.
pub async fn performance(
    State(state): State<ServerState>,
    headers: HeaderMap,
) -> Result<Json<Envelope>, Rejection> {
    require_key(&state, &headers).await?;
    let settings = &state.context.settings;
    Ok(Envelope::success(serde_json::json!({
        "timestamp": Utc::now().to_rfc3339(),
        "audio_processing": {
            "stats": state.context.operator.conversion_stats(),
            "config": {
                "max_concurrent_conversions": settings.max_concurrent_conversions,
                "converter_workers": settings.converter_workers,
            },
        },
        "pool": state.context.operator.status(),
    })))
}
