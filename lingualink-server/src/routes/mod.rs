//! Route table and shared auth guards.

use axum::http::{HeaderMap, StatusCode};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use lingualink_auth::Verification;
use lingualink_core::Error;

use crate::envelope::{reject, Envelope};
use crate::extract::extract_credential;
use crate::state::ServerState;

mod audio;
mod auth;
mod balancer;
mod cache;
mod health;

type Rejection = (StatusCode, Json<Envelope>);

/// All routes under `/api/v1`.
pub fn api_routes() -> Router<ServerState> {
    Router::new()
        // Data path
        .route("/translate_audio", post(audio::translate_audio))
        .route("/supported_formats", get(audio::supported_formats))
        // Liveness
        .route("/health", get(health::health))
        .route("/ping", get(health::ping))
        .route("/status", get(health::status))
        .route("/performance", get(health::performance))
        // Credentials
        .route("/auth/verify", post(auth::verify))
        .route("/auth/keys", get(auth::list_keys).post(auth::create_key).delete(auth::revoke_key))
        .route("/auth/keys/cleanup", post(auth::cleanup_keys))
        .route("/auth/keys/stats", get(auth::key_stats))
        // Backend pool
        .route("/load_balancer/metrics", get(balancer::metrics))
        .route("/load_balancer/status", get(balancer::status))
        .route("/load_balancer/backends", get(balancer::list_backends).post(balancer::add_backend))
        .route("/load_balancer/backends/{name}", delete(balancer::remove_backend))
        .route("/load_balancer/backends/{name}/enable", post(balancer::enable_backend))
        .route("/load_balancer/backends/{name}/disable", post(balancer::disable_backend))
        .route("/load_balancer/backends/{name}/health_check", post(balancer::probe_backend))
        .route("/load_balancer/strategy", get(balancer::get_strategy).put(balancer::set_strategy))
        .route("/load_balancer/health_check/start", post(balancer::start_prober))
        .route("/load_balancer/health_check/stop", post(balancer::stop_prober))
        // Verification cache
        .route("/cache/stats", get(cache::stats))
        .route("/cache/health", get(cache::health))
        .route("/cache/clear", post(cache::clear))
        .route("/cache/invalidate/{secret}", delete(cache::invalidate))
}

/// Verify the presented credential, honoring the global auth switch.
pub(crate) async fn require_key(
    state: &ServerState,
    headers: &HeaderMap,
) -> Result<Verification, Rejection> {
    let verifier = &state.context.verifier;
    if !verifier.auth_enabled() {
        return Ok(Verification { valid: true, admin: false });
    }

    let Some(credential) = extract_credential(headers) else {
        return Err(reject(
            Error::Unauthorized(
                "API key required via X-API-Key header or Authorization: Bearer".to_string(),
            ),
            state.context.settings.debug,
        ));
    };

    match verifier.verify(&credential).await {
        Ok(verification) if verification.valid => Ok(verification),
        Ok(_) => Err(reject(
            Error::Unauthorized("invalid or expired API key".to_string()),
            state.context.settings.debug,
        )),
        Err(e) => Err(reject(e, state.context.settings.debug)),
    }
}

/// Like [`require_key`], but the credential must carry the admin flag.
pub(crate) async fn require_admin(
    state: &ServerState,
    headers: &HeaderMap,
) -> Result<Verification, Rejection> {
    let verification = require_key(state, headers).await?;
    if !state.context.verifier.auth_enabled() || verification.admin {
        Ok(verification)
    } else {
        Err(reject(
            Error::Forbidden("admin privileges required for this operation".to_string()),
            state.context.settings.debug,
        ))
    }
}
