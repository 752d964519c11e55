//! Periodic session expiry

use super::TrackingEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Run [`TrackingEngine::expire_stale_sessions`] every `interval` until `cancel` fires
pub async fn run_expiry_sweep(
    engine: Arc<TrackingEngine>,
    interval: Duration,
    cancel: CancellationToken,
) {
    info!(interval_secs = interval.as_secs(), "Session expiry sweep started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let removed = engine.expire_stale_sessions();
                debug!(removed, active = engine.session_count(), "Expiry sweep pass");
            }
        }
    }

    info!("Session expiry sweep stopped");
}
