//! HTTP boundary of the Lingualink gateway.
//!
//! Routes are thin: they extract the credential and the request pieces,
//! call into the service layer, and wrap the outcome in the JSON
//! envelope. All policy lives below this crate.

mod envelope;
mod extract;
mod routes;
mod state;

pub use envelope::{reject, Envelope};
pub use extract::extract_credential;
pub use routes::api_routes;
pub use state::ServerState;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Multipart framing overhead allowed on top of the upload cap.
const BODY_LIMIT_SLACK: usize = 1024 * 1024;

/// Assemble the full application router.
pub fn build_router(state: ServerState) -> Router {
    let body_limit = state.context.settings.max_upload_size + BODY_LIMIT_SLACK;
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .nest("/api/v1", api_routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
