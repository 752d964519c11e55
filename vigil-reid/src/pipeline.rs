//! Sighting pipeline
//!
//! Entry point for camera pipelines: identify (probe → gallery match), decide
//! re-identification (cross-camera lookup), then update tracking. Notification
//! persistence happens downstream of the engine and never fails a call here.

use crate::config::{MatchingConfig, TrackingConfig};
use crate::gallery::FaceGallery;
use crate::matcher::{MatchResult, SimilarityMatcher};
use crate::tracking::{ReidMatch, SessionSnapshot, Sighting, TrackingEngine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use vigil_common::{Error, Result};

/// A probe embedding from the inference service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Probe {
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub camera_id: Option<String>,
    #[serde(default)]
    pub zone_id: Option<String>,
    pub seen_at: DateTime<Utc>,
}

/// Result of feeding one sighting through the engine
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SightingOutcome {
    /// Session state after the sighting was recorded
    pub session: SessionSnapshot,
    /// Live session this sighting continues, decided before recording it; when that is
    /// the sighting's own session it is shown as updated by the sighting
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reid: Option<ReidMatch>,
}

/// Result of feeding one probe through matcher and engine
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeOutcome {
    #[serde(rename = "match")]
    pub match_result: MatchResult,
    /// Present only when the probe matched an enrolled identity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking: Option<SightingOutcome>,
}

/// Matcher + tracking engine, wired with the configured parameters
pub struct SightingPipeline {
    engine: Arc<TrackingEngine>,
    gallery: FaceGallery,
    matcher: SimilarityMatcher,
    matching: MatchingConfig,
    tracking: TrackingConfig,
}

impl SightingPipeline {
    pub fn new(
        engine: Arc<TrackingEngine>,
        gallery: FaceGallery,
        matching: MatchingConfig,
        tracking: TrackingConfig,
    ) -> Self {
        Self {
            engine,
            gallery,
            matcher: SimilarityMatcher::new(matching.default_threshold),
            matching,
            tracking,
        }
    }

    pub fn engine(&self) -> &Arc<TrackingEngine> {
        &self.engine
    }

    pub fn gallery(&self) -> &FaceGallery {
        &self.gallery
    }

    /// Cross-camera lookup, then record the sighting
    ///
    /// Rejects blank person ids and non-finite similarities; everything downstream of
    /// validation degrades to "no match" rather than failing.
    pub fn process_sighting(&self, sighting: &Sighting) -> Result<SightingOutcome> {
        if sighting.person_id.trim().is_empty() {
            return Err(Error::InvalidInput("person_id must not be blank".into()));
        }
        if !sighting.similarity.is_finite() {
            return Err(Error::InvalidInput("similarity must be a finite number".into()));
        }

        let (session, reid) = self.engine.record_with_reid(
            sighting,
            self.tracking.cross_zone_max_travel(),
            self.tracking.cross_zone_similarity_threshold,
        );

        Ok(SightingOutcome { session, reid })
    }

    /// Identify a probe against the gallery and track it when it matches
    ///
    /// The camera's threshold override applies. Non-matches are reported, not tracked.
    pub async fn process_probe(&self, probe: &Probe) -> Result<ProbeOutcome> {
        let candidates = self.gallery.candidates().await?;
        let threshold = probe
            .camera_id
            .as_deref()
            .map(|camera| self.matching.threshold_for(camera))
            .unwrap_or(self.matching.default_threshold);

        let match_result = self
            .matcher
            .match_probe(&probe.embedding, &candidates, Some(threshold));

        let (identity_id, profile_id) = match (&match_result.identity_id, match_result.profile_id) {
            (Some(identity_id), Some(profile_id)) if match_result.is_match => {
                (identity_id.clone(), profile_id)
            }
            _ => {
                debug!(
                    camera_id = ?probe.camera_id,
                    similarity = match_result.similarity,
                    threshold,
                    "Probe did not match any enrolled identity"
                );
                return Ok(ProbeOutcome {
                    match_result,
                    tracking: None,
                });
            }
        };

        let tracking = self.process_sighting(&Sighting {
            person_id: identity_id,
            profile_id,
            similarity: match_result.similarity,
            camera_id: probe.camera_id.clone(),
            zone_id: probe.zone_id.clone(),
            seen_at: probe.seen_at,
        })?;

        Ok(ProbeOutcome {
            match_result,
            tracking: Some(tracking),
        })
    }
}
