//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use tracing::warn;

use crate::outbox::{OutboxStore, StatusCounts};
use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" when the outbox store cannot be read
    pub status: String,
    /// Module name ("vigil-reid")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    /// Sessions seen within the expiration window
    pub active_sessions: usize,
    /// Sessions in memory, including ones awaiting the expiry sweep
    pub tracked_sessions: usize,
    /// Outbox rows per status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbox: Option<StatusCounts>,
    /// Last error if any (for diagnostics)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let (status, outbox, last_error) = match state.outbox.status_counts().await {
        Ok(counts) => ("ok", Some(counts), None),
        Err(e) => {
            warn!(error = %e, "Health check could not read outbox");
            ("degraded", None, Some(e.to_string()))
        }
    };

    Json(HealthResponse {
        status: status.to_string(),
        module: "vigil-reid".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        active_sessions: state.engine.active_sessions().len(),
        tracked_sessions: state.engine.session_count(),
        outbox,
        last_error,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
