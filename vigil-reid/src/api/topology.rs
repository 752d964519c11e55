//! Topology administration

use axum::{extract::State, routing::{get, post}, Json, Router};

use crate::error::ApiResult;
use crate::topology::{ReloadSummary, TopologyConfig};
use crate::AppState;

/// GET /topology - stored configuration (edges directed)
pub async fn get_topology(State(state): State<AppState>) -> ApiResult<Json<TopologyConfig>> {
    Ok(Json(state.topology_store.load().await?))
}

/// PUT /topology - replace the stored configuration and reload it
pub async fn put_topology(
    State(state): State<AppState>,
    Json(config): Json<TopologyConfig>,
) -> ApiResult<Json<ReloadSummary>> {
    state.topology_store.replace(&config).await?;
    Ok(Json(state.topology_store.reload(&state.topology).await?))
}

/// POST /topology/reload - rebuild the live snapshot from the store
pub async fn reload_topology(State(state): State<AppState>) -> ApiResult<Json<ReloadSummary>> {
    Ok(Json(state.topology_store.reload(&state.topology).await?))
}

pub fn topology_routes() -> Router<AppState> {
    Router::new()
        .route("/topology", get(get_topology).put(put_topology))
        .route("/topology/reload", post(reload_topology))
}
