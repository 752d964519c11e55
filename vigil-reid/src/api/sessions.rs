//! Read-only tracking session diagnostics

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;

use crate::error::{ApiError, ApiResult};
use crate::tracking::SessionSnapshot;
use crate::AppState;

/// One session as reported to monitoring
#[derive(Debug, Serialize)]
pub struct SessionView {
    #[serde(flatten)]
    pub session: SessionSnapshot,
    pub last_seen_age_secs: f64,
}

#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub count: usize,
    pub sessions: Vec<SessionView>,
}

/// GET /sessions
///
/// Sessions seen within the expiration window, sorted by person id.
pub async fn list_sessions(State(state): State<AppState>) -> Json<SessionsResponse> {
    let now = state.engine.now();
    let sessions: Vec<SessionView> = state
        .engine
        .active_sessions()
        .into_iter()
        .map(|session| SessionView {
            last_seen_age_secs: session.last_seen_age_secs(now),
            session,
        })
        .collect();

    Json(SessionsResponse {
        count: sessions.len(),
        sessions,
    })
}

/// GET /sessions/:person_id
pub async fn get_session(
    State(state): State<AppState>,
    Path(person_id): Path<String>,
) -> ApiResult<Json<SessionView>> {
    let session = state
        .engine
        .session(&person_id)
        .ok_or_else(|| ApiError::NotFound(format!("session for {}", person_id)))?;

    Ok(Json(SessionView {
        last_seen_age_secs: session.last_seen_age_secs(state.engine.now()),
        session,
    }))
}

pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/sessions", get(list_sessions))
        .route("/sessions/:person_id", get(get_session))
}
