use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::debug;

/// Live tracking state for one person. Only ever touched under the engine's per-session
/// mutex; callers see [`SessionSnapshot`] copies.
#[derive(Debug)]
pub(crate) struct TrackingSession {
    person_id: String,
    current_profile_id: i64,
    started_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
    last_camera_id: Option<String>,
    seen_cameras: BTreeSet<String>,
    visited_zones: BTreeMap<String, DateTime<Utc>>,
    similarity_history: VecDeque<f32>,
    history_capacity: usize,
    sighting_count: u64,
}

impl TrackingSession {
    pub(crate) fn new(
        person_id: &str,
        profile_id: i64,
        seen_at: DateTime<Utc>,
        history_capacity: usize,
    ) -> Self {
        let history_capacity = history_capacity.max(1);
        Self {
            person_id: person_id.to_string(),
            current_profile_id: profile_id,
            started_at: seen_at,
            last_seen_at: seen_at,
            last_camera_id: None,
            seen_cameras: BTreeSet::new(),
            visited_zones: BTreeMap::new(),
            similarity_history: VecDeque::with_capacity(history_capacity),
            history_capacity,
            sighting_count: 0,
        }
    }

    /// Apply one sighting
    ///
    /// `camera_id`/`zone_id` must already be normalized (non-empty when `Some`). A
    /// sighting older than `last_seen_at` still contributes its similarity, camera and
    /// zone, but never moves `last_seen_at`, `last_camera_id`, the current profile or a
    /// zone visit time backwards.
    pub(crate) fn apply(
        &mut self,
        profile_id: i64,
        similarity: f32,
        camera_id: Option<&str>,
        zone_id: Option<&str>,
        seen_at: DateTime<Utc>,
    ) {
        let in_order = seen_at >= self.last_seen_at;
        self.sighting_count += 1;

        if in_order {
            self.last_seen_at = seen_at;
            self.current_profile_id = profile_id;
        } else {
            debug!(
                person_id = %self.person_id,
                seen_at = %seen_at,
                last_seen_at = %self.last_seen_at,
                "Out-of-order sighting; keeping newer timestamps"
            );
        }
        self.started_at = self.started_at.min(seen_at);

        if similarity.is_finite() {
            if self.similarity_history.len() == self.history_capacity {
                self.similarity_history.pop_front();
            }
            self.similarity_history.push_back(similarity);
        } else {
            debug!(person_id = %self.person_id, "Ignoring non-finite similarity");
        }

        if let Some(camera) = camera_id {
            self.seen_cameras.insert(camera.to_string());
            if in_order {
                self.last_camera_id = Some(camera.to_string());
            }
        }

        if let Some(zone) = zone_id {
            let visit = self.visited_zones.entry(zone.to_string()).or_insert(seen_at);
            if seen_at > *visit {
                *visit = seen_at;
            }
        }
    }

    /// Mean of the similarity history, 0.0 when empty
    pub(crate) fn avg_similarity(&self) -> f32 {
        if self.similarity_history.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.similarity_history.iter().map(|s| *s as f64).sum();
        (sum / self.similarity_history.len() as f64) as f32
    }

    pub(crate) fn last_seen_at(&self) -> DateTime<Utc> {
        self.last_seen_at
    }

    pub(crate) fn last_camera_id(&self) -> Option<&str> {
        self.last_camera_id.as_deref()
    }

    pub(crate) fn has_seen_camera(&self, camera_id: &str) -> bool {
        self.seen_cameras.contains(camera_id)
    }

    pub(crate) fn seen_any_of(&self, cameras: &BTreeSet<String>) -> bool {
        !self.seen_cameras.is_disjoint(cameras)
    }

    pub(crate) fn zone_visit(&self, zone_id: &str) -> Option<DateTime<Utc>> {
        self.visited_zones.get(zone_id).copied()
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            person_id: self.person_id.clone(),
            current_profile_id: self.current_profile_id,
            started_at: self.started_at,
            last_seen_at: self.last_seen_at,
            last_camera_id: self.last_camera_id.clone(),
            seen_cameras: self.seen_cameras.iter().cloned().collect(),
            visited_zones: self.visited_zones.clone(),
            similarity_history: self.similarity_history.iter().copied().collect(),
            avg_similarity: self.avg_similarity(),
            sighting_count: self.sighting_count,
        }
    }
}

/// Read-only copy of a tracking session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub person_id: String,
    pub current_profile_id: i64,
    pub started_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub last_camera_id: Option<String>,
    /// Sorted
    pub seen_cameras: Vec<String>,
    pub visited_zones: BTreeMap<String, DateTime<Utc>>,
    /// Oldest first
    pub similarity_history: Vec<f32>,
    pub avg_similarity: f32,
    pub sighting_count: u64,
}

impl SessionSnapshot {
    /// Seconds since the last sighting, never negative
    pub fn last_seen_age_secs(&self, now: DateTime<Utc>) -> f64 {
        vigil_common::time::elapsed_secs(self.last_seen_at, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_history_is_bounded_fifo() {
        let mut session = TrackingSession::new("p", 1, t0(), 50);
        for i in 0..75 {
            let sim = i as f32 / 100.0;
            session.apply(1, sim, Some("lobby"), None, t0() + Duration::seconds(i));
        }

        let snapshot = session.snapshot();
        assert_eq!(snapshot.similarity_history.len(), 50);
        assert_eq!(snapshot.similarity_history[0], 0.25);
        assert_eq!(snapshot.similarity_history[49], 0.74);

        let expected: f64 = (25..75).map(|i| i as f64 / 100.0).sum::<f64>() / 50.0;
        assert!((snapshot.avg_similarity as f64 - expected).abs() < 1e-5);
        assert_eq!(snapshot.sighting_count, 75);
    }

    #[test]
    fn test_empty_history_averages_zero() {
        let session = TrackingSession::new("p", 1, t0(), 50);
        assert_eq!(session.avg_similarity(), 0.0);
    }

    #[test]
    fn test_out_of_order_sighting_keeps_newer_state() {
        let mut session = TrackingSession::new("p", 1, t0(), 50);
        session.apply(1, 0.9, Some("hall"), Some("z1"), t0() + Duration::seconds(10));
        session.apply(2, 0.7, Some("lobby"), Some("z1"), t0() + Duration::seconds(4));

        let snapshot = session.snapshot();
        assert_eq!(snapshot.last_seen_at, t0() + Duration::seconds(10));
        assert_eq!(snapshot.last_camera_id.as_deref(), Some("hall"));
        assert_eq!(snapshot.current_profile_id, 1);
        assert_eq!(snapshot.visited_zones["z1"], t0() + Duration::seconds(10));
        assert_eq!(snapshot.seen_cameras, vec!["hall".to_string(), "lobby".to_string()]);
        assert_eq!(snapshot.similarity_history, vec![0.9, 0.7]);
    }

    #[test]
    fn test_sighting_without_camera_or_zone() {
        let mut session = TrackingSession::new("p", 1, t0(), 50);
        session.apply(3, 0.8, None, None, t0());

        let snapshot = session.snapshot();
        assert!(snapshot.last_camera_id.is_none());
        assert!(snapshot.seen_cameras.is_empty());
        assert!(snapshot.visited_zones.is_empty());
        assert_eq!(snapshot.current_profile_id, 3);
    }

    #[test]
    fn test_non_finite_similarity_is_not_recorded() {
        let mut session = TrackingSession::new("p", 1, t0(), 50);
        session.apply(1, 0.8, None, None, t0());
        session.apply(1, f32::NAN, None, None, t0());
        assert_eq!(session.snapshot().similarity_history, vec![0.8]);
    }
}
