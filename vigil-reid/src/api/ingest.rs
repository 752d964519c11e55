//! Sighting and probe ingest

use axum::{extract::State, routing::post, Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::ApiResult;
use crate::pipeline::{Probe, ProbeOutcome, SightingOutcome};
use crate::tracking::Sighting;
use crate::AppState;

/// POST /sightings body; `seen_at` defaults to now
#[derive(Debug, Deserialize)]
pub struct SightingRequest {
    pub person_id: String,
    pub profile_id: i64,
    pub similarity: f32,
    #[serde(default)]
    pub camera_id: Option<String>,
    #[serde(default)]
    pub zone_id: Option<String>,
    #[serde(default)]
    pub seen_at: Option<DateTime<Utc>>,
}

/// POST /probes body; `seen_at` defaults to now
#[derive(Debug, Deserialize)]
pub struct ProbeRequest {
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub camera_id: Option<String>,
    #[serde(default)]
    pub zone_id: Option<String>,
    #[serde(default)]
    pub seen_at: Option<DateTime<Utc>>,
}

/// POST /sightings
pub async fn ingest_sighting(
    State(state): State<AppState>,
    Json(request): Json<SightingRequest>,
) -> ApiResult<Json<SightingOutcome>> {
    let sighting = Sighting {
        person_id: request.person_id,
        profile_id: request.profile_id,
        similarity: request.similarity,
        camera_id: request.camera_id,
        zone_id: request.zone_id,
        seen_at: request.seen_at.unwrap_or_else(|| state.engine.now()),
    };

    Ok(Json(state.pipeline.process_sighting(&sighting)?))
}

/// POST /probes
pub async fn ingest_probe(
    State(state): State<AppState>,
    Json(request): Json<ProbeRequest>,
) -> ApiResult<Json<ProbeOutcome>> {
    let probe = Probe {
        embedding: request.embedding,
        camera_id: request.camera_id,
        zone_id: request.zone_id,
        seen_at: request.seen_at.unwrap_or_else(|| state.engine.now()),
    };

    Ok(Json(state.pipeline.process_probe(&probe).await?))
}

pub fn ingest_routes() -> Router<AppState> {
    Router::new()
        .route("/sightings", post(ingest_sighting))
        .route("/probes", post(ingest_probe))
}
