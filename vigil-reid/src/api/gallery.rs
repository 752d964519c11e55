//! Face gallery administration

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::ApiResult;
use crate::gallery::ProfileSummary;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct EnrollRequest {
    pub identity_id: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    pub embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
pub struct EnrollResponse {
    pub profile_id: i64,
}

/// GET /gallery/profiles
pub async fn list_profiles(State(state): State<AppState>) -> ApiResult<Json<Vec<ProfileSummary>>> {
    Ok(Json(state.pipeline.gallery().profiles().await?))
}

/// POST /gallery/profiles
pub async fn enroll_profile(
    State(state): State<AppState>,
    Json(request): Json<EnrollRequest>,
) -> ApiResult<(StatusCode, Json<EnrollResponse>)> {
    let profile_id = state
        .pipeline
        .gallery()
        .enroll(&request.identity_id, &request.embedding)
        .await?;
    Ok((StatusCode::CREATED, Json(EnrollResponse { profile_id })))
}

/// PUT /gallery/profiles/:profile_id
pub async fn update_profile(
    State(state): State<AppState>,
    Path(profile_id): Path<i64>,
    Json(request): Json<UpdateRequest>,
) -> ApiResult<StatusCode> {
    state
        .pipeline
        .gallery()
        .update(profile_id, &request.embedding)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /gallery/profiles/:profile_id
pub async fn remove_profile(
    State(state): State<AppState>,
    Path(profile_id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.pipeline.gallery().remove(profile_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn gallery_routes() -> Router<AppState> {
    Router::new()
        .route("/gallery/profiles", get(list_profiles).post(enroll_profile))
        .route(
            "/gallery/profiles/:profile_id",
            delete(remove_profile).put(update_profile),
        )
}
