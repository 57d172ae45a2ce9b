use std::net::SocketAddr;

use lingualink_core::Settings;
use lingualink_server::{build_router, ServerState};
use lingualink_service::AppContext;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Optional config file path as the first argument; environment
    // variables override file values either way.
    let settings = match std::env::args().nth(1) {
        Some(path) => Settings::load(&path)?,
        None => Settings::from_env()?,
    };

    let default_level = if settings.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let context = AppContext::from_settings(settings)?;
    tracing::info!(
        backends = context.registry.len(),
        strategy = %context.selector.strategy(),
        auth_enabled = context.verifier.auth_enabled(),
        "lingualink gateway starting"
    );

    // The prober runs whenever a pool is configured; single-backend mode
    // still tracks that backend's health.
    context.prober.start();

    let addr: SocketAddr =
        format!("{}:{}", context.settings.host, context.settings.port).parse()?;
    let state = ServerState::new(context);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    Ok(())
}
