//! Tracking engine
//!
//! Live per-person tracking sessions, same-camera and topology-constrained cross-camera
//! lookups, and the periodic expiry sweep.

mod engine;
mod session;
pub mod sweeper;

pub use engine::{MatchVia, ReidMatch, TrackingEngine};
pub use session::SessionSnapshot;
pub use sweeper::run_expiry_sweep;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One face-match event from a camera pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sighting {
    pub person_id: String,
    pub profile_id: i64,
    pub similarity: f32,
    #[serde(default)]
    pub camera_id: Option<String>,
    #[serde(default)]
    pub zone_id: Option<String>,
    pub seen_at: DateTime<Utc>,
}

/// Something the engine wants persisted and published
///
/// Produced after the session lock is released and handed to an unbounded channel, so
/// sending never blocks and a dead consumer never fails a sighting.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackingNotification {
    Sighting(SightingRecorded),
    CrossCameraReid(CrossCameraReid),
}

/// A sighting was applied to a session
#[derive(Debug, Clone, PartialEq)]
pub struct SightingRecorded {
    pub person_id: String,
    pub profile_id: i64,
    pub camera_id: Option<String>,
    pub zone_id: Option<String>,
    pub similarity: f32,
    pub avg_similarity: f32,
    pub seen_cameras: usize,
    pub seen_at: DateTime<Utc>,
}

/// A cross-camera lookup linked a camera to a session last seen on a neighbor
#[derive(Debug, Clone, PartialEq)]
pub struct CrossCameraReid {
    pub person_id: String,
    pub profile_id: i64,
    pub from_camera: String,
    pub to_camera: String,
    pub zone_id: Option<String>,
    pub travel_seconds: f64,
    pub similarity: f32,
    /// `last_seen_at` of the matched session when it was matched
    pub prior_seen_at: DateTime<Utc>,
    pub detected_at: DateTime<Utc>,
}
