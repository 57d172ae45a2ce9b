//! Verification cache operator routes.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;

use super::{require_admin, Rejection};
use crate::envelope::Envelope;
use crate::state::ServerState;

/// `GET /api/v1/cache/stats` (admin)
pub async fn stats(
    State(state): State<ServerState>,
    headers: HeaderMap,
) -> Result<Json<Envelope>, Rejection> {
    require_admin(&state, &headers).await?;
    Ok(Envelope::success(state.context.operator.cache_stats()))
}

/// `GET /api/v1/cache/health`
pub async fn health(State(state): State<ServerState>) -> Json<Envelope> {
    let stats = state.context.operator.cache_stats();
    Envelope::success(serde_json::json!({
        "cache_enabled": stats.enabled,
        "cache_healthy": stats.healthy,
    }))
}

/// `POST /api/v1/cache/clear` (admin)
pub async fn clear(
    State(state): State<ServerState>,
    headers: HeaderMap,
) -> Result<Json<Envelope>, Rejection> {
    require_admin(&state, &headers).await?;
    if state.context.operator.clear_cache() {
        Ok(Envelope::success_message("all cached verdicts cleared"))
    } else {
        Ok(Envelope::success_message("cache is disabled, nothing to clear"))
    }
}

/// `DELETE /api/v1/cache/invalidate/{secret}` (admin)
pub async fn invalidate(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Path(secret): Path<String>,
) -> Result<Json<Envelope>, Rejection> {
    require_admin(&state, &headers).await?;
    if state.context.operator.invalidate_cache_entry(&secret) {
        Ok(Envelope::success_message("cache entry invalidated"))
    } else {
        Ok(Envelope::success_message("cache is disabled, nothing to invalidate"))
    }
}
