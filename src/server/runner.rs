//! Server execution logic.

use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::common::time::SystemClock;

use super::{
    config::CoordinatorConfig,
    handler::{health_check, websocket_handler},
    reaper::spawn_reaper,
    signal::shutdown_signal,
    state::AppState,
};

/// Build the application router for the given shared state.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .route("/api/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the Sonic Canvas coordinator server
///
/// # Arguments
///
/// * `host` - The host address to bind to (e.g., "127.0.0.1")
/// * `port` - The port number to bind to (e.g., 8080)
/// * `config` - Coordinator policy configuration
pub async fn run_server(
    host: String,
    port: u16,
    config: CoordinatorConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let state = Arc::new(AppState::new(config, Arc::new(SystemClock)));

    // The reaper runs for the whole server lifetime.
    let _reaper = spawn_reaper(Arc::clone(&state));

    let app = router(state);

    let bind_addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    tracing::info!(
        "Sonic Canvas coordinator listening on {}",
        listener.local_addr()?
    );
    tracing::info!("Connect to: ws://{}/ws", bind_addr);
    tracing::info!("Press Ctrl+C to shutdown gracefully");

    // Set up graceful shutdown signal handler
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");

    Ok(())
}
