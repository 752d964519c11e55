//! Serialized bodies of the domain events carried by outbox rows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Body of a `camera/tracking` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingPayload {
    pub person_id: String,
    pub profile_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<String>,
    /// Similarity of this sighting
    pub similarity: f32,
    /// Mean similarity over the session history after this sighting
    pub avg_similarity: f32,
    pub seen_cameras: usize,
    pub seen_at: DateTime<Utc>,
}

/// Body of a `camera/cross_camera_reid` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossCameraReidPayload {
    pub person_id: String,
    pub profile_id: i64,
    pub from_camera: String,
    pub to_camera: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<String>,
    /// Seconds between the last sighting on `from_camera` and the lookup
    pub travel_seconds: f64,
    /// Session mean similarity at the time of the match
    pub similarity: f32,
    pub detected_at: DateTime<Utc>,
}

/// Body of a `system/status` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusPayload {
    pub component: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
    pub at: DateTime<Utc>,
}
