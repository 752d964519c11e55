//! Server-Sent Events stream of published envelopes

use crate::error::{ApiError, ApiResult};
use crate::topology::normalize_id;
use crate::AppState;
use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vigil_common::events::Scope;

#[derive(Debug, Deserialize)]
pub struct EventQuery {
    /// `global`, `camera:<id>`, `role:<name>`, ... ; absent means every envelope
    #[serde(default)]
    pub scope: Option<String>,
}

/// Parse a `?scope=` filter; camera keys match the normalized ids envelopes carry
fn subscriber_scope(raw: &str) -> vigil_common::Result<Scope> {
    Ok(match raw.parse()? {
        Scope::Camera(camera) => Scope::Camera(normalize_id(&camera)),
        scope => scope,
    })
}

/// GET /events?scope=...
///
/// Envelopes addressed to the requested scope, plus every global envelope. The SSE
/// event name is the envelope's event (`tracking`, `cross_camera_reid`, `status`).
pub async fn event_stream(
    State(state): State<AppState>,
    Query(query): Query<EventQuery>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let filter = query
        .scope
        .as_deref()
        .map(subscriber_scope)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let client_id = Uuid::new_v4();
    info!(%client_id, scope = ?filter, "New SSE client connected");
    let mut rx = state.event_bus.subscribe();

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(envelope) => {
                    if let Some(filter) = &filter {
                        if !envelope.scope.reaches(filter) {
                            continue;
                        }
                    }
                    match serde_json::to_string(&envelope) {
                        Ok(json) => {
                            debug!(%client_id, event = %envelope.event, scope = %envelope.scope, "SSE: forwarding envelope");
                            yield Ok(Event::default().event(envelope.event.clone()).data(json));
                        }
                        Err(e) => warn!(error = %e, "SSE: failed to serialize envelope"),
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(%client_id, skipped, "SSE client lagging; envelopes dropped");
                }
                Err(RecvError::Closed) => {
                    debug!(%client_id, "SSE: event bus closed");
                    break;
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    ))
}

pub fn event_routes() -> Router<AppState> {
    Router::new().route("/events", get(event_stream))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_filter_is_normalized() {
        let filter = subscriber_scope("camera: Lobby ").unwrap();
        assert_eq!(filter, Scope::Camera("lobby".into()));
        assert!(Scope::Camera("lobby".into()).reaches(&filter));
    }

    #[test]
    fn test_other_filters_keep_their_keys() {
        assert_eq!(subscriber_scope("role:Operator").unwrap(), Scope::Role("Operator".into()));
        assert_eq!(subscriber_scope("global").unwrap(), Scope::Global);
        assert!(subscriber_scope("camera").is_err());
    }
}
