//! Periodic sweep that frees bookkeeping for rooms idle past the grace
//! period. Runs for the lifetime of the server.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::state::AppState;

/// Spawn the idle room reaper. The sweep period is derived from the
/// configured grace period (see `CoordinatorConfig::reaper_interval_ms`).
pub fn spawn_reaper(state: Arc<AppState>) -> JoinHandle<()> {
    let period = Duration::from_millis(state.config.reaper_interval_ms());
    tracing::info!("Idle room reaper sweeping every {:?}", period);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately; skip it so sweeps start one
        // full period after boot.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            state.coordinator.lock().await.sweep();
        }
    })
}
