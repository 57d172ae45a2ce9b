//! Credential verification and key management.

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use lingualink_auth::CreateKey;
use lingualink_core::Error;
use serde::Deserialize;

use super::{require_admin, require_key, Rejection};
use crate::envelope::{reject, Envelope};
use crate::state::ServerState;

/// `POST /api/v1/auth/verify` — check the presented credential.
pub async fn verify(
    State(state): State<ServerState>,
    headers: HeaderMap,
) -> Result<Json<Envelope>, Rejection> {
    let verification = require_key(&state, &headers).await?;
    Ok(Envelope::success(serde_json::json!({
        "valid": verification.valid,
        "is_admin": verification.admin,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub include_revoked: bool,
}

/// `GET /api/v1/auth/keys` (admin)
pub async fn list_keys(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<Envelope>, Rejection> {
    require_admin(&state, &headers).await?;
    let keys = state
        .context
        .operator
        .list_keys(query.include_revoked)
        .map_err(|e| reject(e, state.context.settings.debug))?;
    Ok(Envelope::success(serde_json::json!({ "count": keys.len(), "keys": keys })))
}

#[derive(Debug, Deserialize)]
pub struct CreateKeyRequest {
    pub name: Option<String>,
    pub ttl_days: Option<i64>,
    pub description: Option<String>,
    #[serde(default)]
    pub admin: bool,
}

/// `POST /api/v1/auth/keys` (admin)
pub async fn create_key(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(body): Json<CreateKeyRequest>,
) -> Result<Json<Envelope>, Rejection> {
    require_admin(&state, &headers).await?;
    let secret = state
        .context
        .operator
        .create_key(CreateKey {
            name: body.name,
            ttl_days: body.ttl_days,
            description: body.description,
            created_by: Some("operator_api".to_string()),
            admin: body.admin,
        })
        .map_err(|e| reject(e, state.context.settings.debug))?;
    Ok(Envelope::success(serde_json::json!({ "api_key": secret })))
}

#[derive(Debug, Deserialize)]
pub struct RevokeKeyRequest {
    pub api_key: String,
}

/// `DELETE /api/v1/auth/keys` (admin)
pub async fn revoke_key(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(body): Json<RevokeKeyRequest>,
) -> Result<Json<Envelope>, Rejection> {
    require_admin(&state, &headers).await?;
    let revoked = state
        .context
        .operator
        .revoke_key(&body.api_key)
        .map_err(|e| reject(e, state.context.settings.debug))?;
    if revoked {
        Ok(Envelope::success_message("API key revoked"))
    } else {
        Err(reject(
            Error::Config("key not found or already revoked".to_string()),
            state.context.settings.debug,
        ))
    }
}

/// `POST /api/v1/auth/keys/cleanup` (admin)
pub async fn cleanup_keys(
    State(state): State<ServerState>,
    headers: HeaderMap,
) -> Result<Json<Envelope>, Rejection> {
    require_admin(&state, &headers).await?;
    let count = state
        .context
        .operator
        .cleanup_expired_keys()
        .map_err(|e| reject(e, state.context.settings.debug))?;
    Ok(Envelope::success(serde_json::json!({ "deactivated": count })))
}

/// `GET /api/v1/auth/keys/stats` (admin)
pub async fn key_stats(
    State(state): State<ServerState>,
    headers: HeaderMap,
) -> Result<Json<Envelope>, Rejection> {
    require_admin(&state, &headers).await?;
    let stats = state
        .context
        .operator
        .key_store_stats()
        .map_err(|e| reject(e, state.context.settings.debug))?;
    Ok(Envelope::success(stats))
}
