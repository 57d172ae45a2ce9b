//! Backend pool operator routes.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use lingualink_core::{BackendConfig, Error};
use lingualink_service::StrategyUpdate;

use super::{require_key, Rejection};
use crate::envelope::{reject, Envelope};
use crate::state::ServerState;

/// `GET /api/v1/load_balancer/metrics`
pub async fn metrics(
    State(state): State<ServerState>,
    headers: HeaderMap,
) -> Result<Json<Envelope>, Rejection> {
    require_key(&state, &headers).await?;
    Ok(Envelope::success(state.context.operator.backends()))
}

/// `GET /api/v1/load_balancer/status`
pub async fn status(
    State(state): State<ServerState>,
    headers: HeaderMap,
) -> Result<Json<Envelope>, Rejection> {
    require_key(&state, &headers).await?;
    Ok(Envelope::success(state.context.operator.status()))
}

/// `GET /api/v1/load_balancer/backends`
pub async fn list_backends(
    State(state): State<ServerState>,
    headers: HeaderMap,
) -> Result<Json<Envelope>, Rejection> {
    require_key(&state, &headers).await?;
    Ok(Envelope::success(state.context.operator.backends()))
}

/// `POST /api/v1/load_balancer/backends`
pub async fn add_backend(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(config): Json<BackendConfig>,
) -> Result<Json<Envelope>, Rejection> {
    require_key(&state, &headers).await?;
    let name = config.name.clone();
    state
        .context
        .operator
        .add_backend(config)
        .map_err(|e| reject(e, state.context.settings.debug))?;
    Ok(Envelope::success_message(format!("backend {name} registered")))
}

/// `DELETE /api/v1/load_balancer/backends/{name}`
pub async fn remove_backend(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<Json<Envelope>, Rejection> {
    require_key(&state, &headers).await?;
    if state.context.operator.remove_backend(&name) {
        Ok(Envelope::success_message(format!("backend {name} removed")))
    } else {
        Err(unknown_backend(&state, &name))
    }
}

/// `POST /api/v1/load_balancer/backends/{name}/enable`
pub async fn enable_backend(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<Json<Envelope>, Rejection> {
    require_key(&state, &headers).await?;
    if state.context.operator.enable_backend(&name) {
        Ok(Envelope::success_message(format!("backend {name} enabled")))
    } else {
        Err(unknown_backend(&state, &name))
    }
}

/// `POST /api/v1/load_balancer/backends/{name}/disable`
pub async fn disable_backend(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<Json<Envelope>, Rejection> {
    require_key(&state, &headers).await?;
    if state.context.operator.disable_backend(&name) {
        Ok(Envelope::success_message(format!("backend {name} disabled")))
    } else {
        Err(unknown_backend(&state, &name))
    }
}

/// `POST /api/v1/load_balancer/backends/{name}/health_check`
pub async fn probe_backend(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<Json<Envelope>, Rejection> {
    require_key(&state, &headers).await?;
    let report = state
        .context
        .operator
        .probe_backend(&name)
        .await
        .map_err(|e| reject(e, state.context.settings.debug))?;
    Ok(Envelope::success(report))
}

/// `GET /api/v1/load_balancer/strategy`
pub async fn get_strategy(
    State(state): State<ServerState>,
    headers: HeaderMap,
) -> Result<Json<Envelope>, Rejection> {
    require_key(&state, &headers).await?;
    Ok(Envelope::success(state.context.operator.strategy()))
}

/// `PUT /api/v1/load_balancer/strategy`
pub async fn set_strategy(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(update): Json<StrategyUpdate>,
) -> Result<Json<Envelope>, Rejection> {
    require_key(&state, &headers).await?;
    let info = state
        .context
        .operator
        .set_strategy(update)
        .map_err(|e| reject(e, state.context.settings.debug))?;
    Ok(Envelope::success(info))
}

/// `POST /api/v1/load_balancer/health_check/start`
pub async fn start_prober(
    State(state): State<ServerState>,
    headers: HeaderMap,
) -> Result<Json<Envelope>, Rejection> {
    require_key(&state, &headers).await?;
    if state.context.operator.start_prober() {
        Ok(Envelope::success_message("health probe loop started"))
    } else {
        Ok(Envelope::success_message("health probe loop already running"))
    }
}

/// `POST /api/v1/load_balancer/health_check/stop`
pub async fn stop_prober(
    State(state): State<ServerState>,
    headers: HeaderMap,
) -> Result<Json<Envelope>, Rejection> {
    require_key(&state, &headers).await?;
    if state.context.operator.stop_prober() {
        Ok(Envelope::success_message("health probe loop stopped"))
    } else {
        Ok(Envelope::success_message("health probe loop was not running"))
    }
}

fn unknown_backend(state: &ServerState, name: &str) -> Rejection {
    reject(
        Error::Config(format!("backend {name:?} is not registered")),
        state.context.settings.debug,
    )
}
