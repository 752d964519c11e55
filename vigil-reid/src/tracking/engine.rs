//! Concurrent session map and lookups
//!
//! Sessions live in a `DashMap<person_id, Arc<Mutex<TrackingSession>>>`. Get-or-create
//! goes through the map's entry API, so racing first sightings of one person converge on
//! a single session. Each session has its own mutex; nothing else is ever locked while it
//! is held, and notification sends happen after it is released.
//!
//! Scans clone the session `Arc`s out of the map first and lock them one at a time, so a
//! scan never holds a map shard while waiting on a session.

use super::session::{SessionSnapshot, TrackingSession};
use super::{CrossCameraReid, Sighting, SightingRecorded, TrackingNotification};
use crate::config::TrackingConfig;
use crate::topology::{normalize_id, normalize_opt, TopologyHandle};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use vigil_common::time::elapsed_secs;
use vigil_common::Clock;

type SessionCell = Arc<Mutex<TrackingSession>>;

/// How a re-identification match was found
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchVia {
    /// Re-observed on the queried camera; topology not consulted
    SameCamera,
    /// Last seen on a topology neighbor of the queried camera
    Neighbor {
        from_camera: String,
        travel_seconds: f64,
    },
}

/// Result of a cross-camera lookup
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReidMatch {
    pub session: SessionSnapshot,
    pub via: MatchVia,
}

/// A lookup hit plus what its notification needs
struct CrossZoneHit {
    matched: ReidMatch,
    /// `last_seen_at` of the matched session before any later sighting
    prior_seen_at: DateTime<Utc>,
    to_camera: String,
    zone_id: Option<String>,
    detected_at: DateTime<Utc>,
}

impl CrossZoneHit {
    /// Neighbor hits only; same-camera re-observations are not re-identifications
    fn notification(&self) -> Option<CrossCameraReid> {
        let MatchVia::Neighbor {
            from_camera,
            travel_seconds,
        } = &self.matched.via
        else {
            return None;
        };
        let session = &self.matched.session;
        Some(CrossCameraReid {
            person_id: session.person_id.clone(),
            profile_id: session.current_profile_id,
            from_camera: from_camera.clone(),
            to_camera: self.to_camera.clone(),
            zone_id: self.zone_id.clone(),
            travel_seconds: *travel_seconds,
            similarity: session.avg_similarity,
            prior_seen_at: self.prior_seen_at,
            detected_at: self.detected_at,
        })
    }
}

/// Owner of all live tracking sessions
pub struct TrackingEngine {
    sessions: DashMap<String, SessionCell>,
    topology: TopologyHandle,
    config: TrackingConfig,
    clock: Arc<dyn Clock>,
    notifications: Option<mpsc::UnboundedSender<TrackingNotification>>,
}

/// Deterministic preference between two qualifying sessions: highest mean similarity,
/// then most recent sighting, then smallest person id
fn prefer(a: &SessionSnapshot, b: &SessionSnapshot) -> Ordering {
    a.avg_similarity
        .partial_cmp(&b.avg_similarity)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.last_seen_at.cmp(&b.last_seen_at))
        .then_with(|| b.person_id.cmp(&a.person_id))
}

impl TrackingEngine {
    pub fn new(topology: TopologyHandle, config: TrackingConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: DashMap::new(),
            topology,
            config,
            clock,
            notifications: None,
        }
    }

    /// Send tracking notifications to `tx`
    ///
    /// The channel is unbounded so a sighting never waits on persistence. A stalled
    /// consumer therefore grows the queue without limit. That is accepted: the consumer
    /// is an in-process SQLite writer sized for camera sighting rates.
    pub fn with_notifications(mut self, tx: mpsc::UnboundedSender<TrackingNotification>) -> Self {
        self.notifications = Some(tx);
        self
    }

    pub fn topology(&self) -> &TopologyHandle {
        &self.topology
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn notify(&self, notification: TrackingNotification) {
        if let Some(tx) = &self.notifications {
            if tx.send(notification).is_err() {
                debug!("Notification channel closed; dropping tracking notification");
            }
        }
    }

    fn cells(&self) -> Vec<SessionCell> {
        self.sessions.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Apply a sighting to the person's session, creating it on first sight
    ///
    /// Camera and zone ids are normalized. Returns a snapshot taken inside the
    /// session's critical section.
    pub fn record_sighting(&self, sighting: &Sighting) -> SessionSnapshot {
        let camera_id = normalize_opt(sighting.camera_id.as_deref());
        let zone_id = normalize_opt(sighting.zone_id.as_deref());

        let cell = self
            .sessions
            .entry(sighting.person_id.clone())
            .or_insert_with(|| {
                debug!(person_id = %sighting.person_id, "Starting tracking session");
                Arc::new(Mutex::new(TrackingSession::new(
                    &sighting.person_id,
                    sighting.profile_id,
                    sighting.seen_at,
                    self.config.history_capacity,
                )))
            })
            .value()
            .clone();

        let snapshot = {
            let mut session = cell.lock();
            session.apply(
                sighting.profile_id,
                sighting.similarity,
                camera_id.as_deref(),
                zone_id.as_deref(),
                sighting.seen_at,
            );
            session.snapshot()
        };

        debug!(
            person_id = %snapshot.person_id,
            camera_id = ?camera_id,
            zone_id = ?zone_id,
            similarity = sighting.similarity,
            avg_similarity = snapshot.avg_similarity,
            "Recorded sighting"
        );

        self.notify(TrackingNotification::Sighting(SightingRecorded {
            person_id: snapshot.person_id.clone(),
            profile_id: sighting.profile_id,
            camera_id,
            zone_id,
            similarity: sighting.similarity,
            avg_similarity: snapshot.avg_similarity,
            seen_cameras: snapshot.seen_cameras.len(),
            seen_at: sighting.seen_at,
        }));

        snapshot
    }

    /// Best session recently seen on `camera_id`
    ///
    /// Qualifies when last seen within `max_age`, `camera_id` is among its seen cameras,
    /// and its mean similarity reaches `min_similarity`.
    pub fn find_recent_match(
        &self,
        camera_id: &str,
        max_age: Duration,
        min_similarity: f32,
    ) -> Option<SessionSnapshot> {
        let camera = normalize_id(camera_id);
        if camera.is_empty() {
            return None;
        }
        let now = self.clock.now();

        self.cells()
            .into_iter()
            .filter_map(|cell| {
                let session = cell.lock();
                let qualifies = now - session.last_seen_at() <= max_age
                    && session.has_seen_camera(&camera)
                    && session.avg_similarity() >= min_similarity;
                if qualifies {
                    Some(session.snapshot())
                } else {
                    None
                }
            })
            .max_by(prefer)
    }

    /// Decide whether a sighting on `camera_id` continues a live session
    ///
    /// A same-camera re-observation (within the configured same-camera window and
    /// threshold) wins outright. Otherwise the best session whose last camera is a
    /// topology neighbor of `camera_id` is returned, subject to `max_travel`, the edge
    /// travel bound when one exists, the zone-visit window and `min_similarity`.
    /// Neighbor hits emit a cross-camera re-identification notification.
    pub fn find_cross_zone_match(
        &self,
        camera_id: &str,
        zone_id: Option<&str>,
        max_travel: Duration,
        min_similarity: f32,
    ) -> Option<ReidMatch> {
        let hit = self.locate_cross_zone(camera_id, zone_id, max_travel, min_similarity)?;
        if let Some(event) = hit.notification() {
            self.notify(TrackingNotification::CrossCameraReid(event));
        }
        Some(hit.matched)
    }

    /// Cross-camera lookup on the state before `sighting`, then record it
    ///
    /// When the match is the sighting's own session, the returned snapshot and the
    /// re-identification notification reflect the session after the sighting was
    /// applied. The notification follows the sighting's own.
    pub fn record_with_reid(
        &self,
        sighting: &Sighting,
        max_travel: Duration,
        min_similarity: f32,
    ) -> (SessionSnapshot, Option<ReidMatch>) {
        let hit = sighting
            .camera_id
            .as_deref()
            .filter(|camera| !camera.trim().is_empty())
            .and_then(|camera| {
                self.locate_cross_zone(camera, sighting.zone_id.as_deref(), max_travel, min_similarity)
            });

        let session = self.record_sighting(sighting);

        let reid = hit.map(|mut hit| {
            if hit.matched.session.person_id == session.person_id {
                hit.matched.session = session.clone();
            }
            if let Some(event) = hit.notification() {
                self.notify(TrackingNotification::CrossCameraReid(event));
            }
            hit.matched
        });

        (session, reid)
    }

    fn locate_cross_zone(
        &self,
        camera_id: &str,
        zone_id: Option<&str>,
        max_travel: Duration,
        min_similarity: f32,
    ) -> Option<CrossZoneHit> {
        let camera = normalize_id(camera_id);
        if camera.is_empty() {
            return None;
        }
        let now = self.clock.now();

        if let Some(session) = self.find_recent_match(
            &camera,
            self.config.same_camera_max_age(),
            self.config.same_camera_similarity_threshold,
        ) {
            debug!(person_id = %session.person_id, camera_id = %camera, "Same-camera re-observation");
            return Some(CrossZoneHit {
                prior_seen_at: session.last_seen_at,
                matched: ReidMatch {
                    session,
                    via: MatchVia::SameCamera,
                },
                to_camera: camera,
                zone_id: normalize_opt(zone_id),
                detected_at: now,
            });
        }

        let topology = self.topology.snapshot();
        let neighbors = topology.neighbors(&camera);
        let requested_zone = normalize_opt(zone_id);
        let topology_zone = topology.zone_of(&camera).map(str::to_string);

        if let (Some(requested), Some(known)) = (&requested_zone, &topology_zone) {
            if requested != known {
                warn!(
                    camera_id = %camera,
                    requested_zone = %requested,
                    topology_zone = %known,
                    "Sighting zone disagrees with camera topology"
                );
            }
        }

        if neighbors.is_empty() {
            debug!(camera_id = %camera, "No topology neighbors; no cross-camera match");
            return None;
        }

        let zone = requested_zone.or(topology_zone);

        let best = self
            .cells()
            .into_iter()
            .filter_map(|cell| {
                let session = cell.lock();
                let age = now - session.last_seen_at();
                if age > max_travel {
                    return None;
                }

                let from_camera = session.last_camera_id()?;
                if !neighbors.contains(from_camera) || !session.seen_any_of(&neighbors) {
                    return None;
                }

                let travel_seconds = elapsed_secs(session.last_seen_at(), now);
                if let Some(bound) = topology.travel_seconds(from_camera, &camera) {
                    if travel_seconds > bound {
                        return None;
                    }
                }

                if let Some(visit) = zone.as_deref().and_then(|z| session.zone_visit(z)) {
                    if now - visit > max_travel {
                        return None;
                    }
                }

                if session.avg_similarity() < min_similarity {
                    return None;
                }

                Some((session.snapshot(), from_camera.to_string(), travel_seconds))
            })
            .max_by(|a, b| prefer(&a.0, &b.0))?;

        let (session, from_camera, travel_seconds) = best;

        info!(
            person_id = %session.person_id,
            from_camera = %from_camera,
            to_camera = %camera,
            travel_seconds,
            avg_similarity = session.avg_similarity,
            "Cross-camera re-identification"
        );

        Some(CrossZoneHit {
            prior_seen_at: session.last_seen_at,
            matched: ReidMatch {
                session,
                via: MatchVia::Neighbor {
                    from_camera,
                    travel_seconds,
                },
            },
            to_camera: camera,
            zone_id: zone,
            detected_at: now,
        })
    }

    /// Drop every session idle longer than the expiration window; returns how many
    pub fn expire_stale_sessions(&self) -> usize {
        let now = self.clock.now();
        let expiration = self.config.session_expiration();
        let mut removed = 0;

        self.sessions.retain(|_, cell| {
            let keep = now - cell.lock().last_seen_at() <= expiration;
            if !keep {
                removed += 1;
            }
            keep
        });

        if removed > 0 {
            info!(removed, remaining = self.sessions.len(), "Expired stale tracking sessions");
        }
        removed
    }

    /// Snapshots of sessions seen within the expiration window, sorted by person id
    pub fn active_sessions(&self) -> Vec<SessionSnapshot> {
        let now = self.clock.now();
        let expiration = self.config.session_expiration();

        let mut active: Vec<SessionSnapshot> = self
            .cells()
            .into_iter()
            .filter_map(|cell| {
                let session = cell.lock();
                if now - session.last_seen_at() < expiration {
                    Some(session.snapshot())
                } else {
                    None
                }
            })
            .collect();
        active.sort_by(|a, b| a.person_id.cmp(&b.person_id));
        active
    }

    pub fn session(&self, person_id: &str) -> Option<SessionSnapshot> {
        let cell = self.sessions.get(person_id)?.value().clone();
        let snapshot = cell.lock().snapshot();
        Some(snapshot)
    }

    /// Sessions in the map, including any not yet swept
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{CameraEdge, CameraTopology, CameraZone, TopologyConfig};
    use chrono::TimeZone;
    use vigil_common::ManualClock;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn topology() -> TopologyHandle {
        let config = TopologyConfig {
            same_zone_is_neighbor: false,
            cameras: vec![
                CameraZone { id: "lobby".into(), zone: "z1".into() },
                CameraZone { id: "hall".into(), zone: "z1".into() },
                CameraZone { id: "dock".into(), zone: "z2".into() },
            ],
            edges: vec![CameraEdge {
                from: "lobby".into(),
                to: "hall".into(),
                travel_seconds: Some(12.0),
                bidirectional: true,
            }],
        };
        TopologyHandle::new(CameraTopology::from_config(&config))
    }

    fn engine(clock: Arc<ManualClock>) -> TrackingEngine {
        TrackingEngine::new(topology(), TrackingConfig::default(), clock)
    }

    fn sighting(person: &str, camera: &str, zone: &str, similarity: f32, at: DateTime<Utc>) -> Sighting {
        Sighting {
            person_id: person.into(),
            profile_id: 1,
            similarity,
            camera_id: Some(camera.into()),
            zone_id: Some(zone.into()),
            seen_at: at,
        }
    }

    #[test]
    fn test_record_creates_then_updates_one_session() {
        let clock = Arc::new(ManualClock::new(t0()));
        let engine = engine(clock.clone());

        engine.record_sighting(&sighting("p", "Lobby", "Z1", 0.9, t0()));
        let snapshot = engine.record_sighting(&sighting("p", "hall", "z1", 0.7, t0() + Duration::seconds(3)));

        assert_eq!(engine.session_count(), 1);
        assert_eq!(snapshot.seen_cameras, vec!["hall".to_string(), "lobby".to_string()]);
        assert_eq!(snapshot.last_camera_id.as_deref(), Some("hall"));
        assert!((snapshot.avg_similarity - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_recent_match_tie_break() {
        let clock = Arc::new(ManualClock::new(t0() + Duration::seconds(5)));
        let engine = engine(clock);

        engine.record_sighting(&sighting("b", "lobby", "z1", 0.8, t0()));
        engine.record_sighting(&sighting("a", "lobby", "z1", 0.8, t0()));
        engine.record_sighting(&sighting("c", "lobby", "z1", 0.8, t0() + Duration::seconds(1)));
        engine.record_sighting(&sighting("low", "lobby", "z1", 0.5, t0() + Duration::seconds(2)));

        // Equal similarity: most recent wins
        let found = engine.find_recent_match("lobby", Duration::seconds(10), 0.6).unwrap();
        assert_eq!(found.person_id, "c");

        // Shorter window leaves only the latest sighting
        let found = engine.find_recent_match("LOBBY", Duration::seconds(4), 0.6).unwrap();
        assert_eq!(found.person_id, "c");

        // Equal similarity and time: smallest person id wins
        engine.record_sighting(&sighting("y", "hall", "z1", 0.8, t0()));
        engine.record_sighting(&sighting("x", "hall", "z1", 0.8, t0()));
        let found = engine.find_recent_match("hall", Duration::seconds(10), 0.6).unwrap();
        assert_eq!(found.person_id, "x");
    }

    #[test]
    fn test_recent_match_respects_age_and_threshold() {
        let clock = Arc::new(ManualClock::new(t0()));
        let engine = engine(clock.clone());
        engine.record_sighting(&sighting("a", "lobby", "z1", 0.8, t0()));
        engine.record_sighting(&sighting("b", "lobby", "z1", 0.79, t0()));

        clock.advance_secs(11);
        assert!(engine.find_recent_match("lobby", Duration::seconds(10), 0.6).is_none());
        assert!(engine.find_recent_match("lobby", Duration::seconds(11), 0.85).is_none());
        assert_eq!(
            engine.find_recent_match("lobby", Duration::seconds(11), 0.6).unwrap().person_id,
            "a"
        );
        assert!(engine.find_recent_match("", Duration::seconds(11), 0.0).is_none());
    }

    #[test]
    fn test_cross_zone_miss_without_neighbors() {
        let clock = Arc::new(ManualClock::new(t0()));
        let engine = engine(clock.clone());
        engine.record_sighting(&sighting("p", "lobby", "z1", 0.9, t0()));

        clock.advance_secs(2);
        assert!(engine
            .find_cross_zone_match("dock", Some("z2"), Duration::seconds(30), 0.6)
            .is_none());
    }

    #[test]
    fn test_expire_and_active_sessions() {
        let clock = Arc::new(ManualClock::new(t0()));
        let engine = engine(clock.clone());
        engine.record_sighting(&sighting("old", "lobby", "z1", 0.9, t0()));
        clock.advance_secs(200);
        engine.record_sighting(&sighting("new", "hall", "z1", 0.9, clock.now()));

        clock.advance_secs(150);
        let active = engine.active_sessions();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].person_id, "new");
        assert_eq!(active[0].last_seen_age_secs(clock.now()), 150.0);

        assert_eq!(engine.expire_stale_sessions(), 1);
        assert_eq!(engine.session_count(), 1);
        assert!(engine.session("old").is_none());
        assert_eq!(engine.expire_stale_sessions(), 0);
    }

    #[test]
    fn test_notifications_follow_sightings() {
        let clock = Arc::new(ManualClock::new(t0()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let engine = engine(clock).with_notifications(tx);

        engine.record_sighting(&sighting("p", "Lobby", "z1", 0.9, t0()));

        match rx.try_recv().unwrap() {
            TrackingNotification::Sighting(recorded) => {
                assert_eq!(recorded.person_id, "p");
                assert_eq!(recorded.camera_id.as_deref(), Some("lobby"));
                assert_eq!(recorded.seen_cameras, 1);
            }
            other => panic!("unexpected notification {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_record_with_reid_reports_updated_session() {
        let clock = Arc::new(ManualClock::new(t0()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let engine = engine(clock.clone()).with_notifications(tx);

        engine.record_sighting(&sighting("p", "lobby", "z1", 0.9, t0()));
        clock.advance_secs(5);
        let (session, reid) = engine.record_with_reid(
            &sighting("p", "hall", "z1", 0.7, t0() + Duration::seconds(5)),
            Duration::seconds(30),
            0.6,
        );

        let reid = reid.expect("hall continues the lobby session");
        assert_eq!(reid.session, session);
        assert!((reid.session.avg_similarity - 0.8).abs() < 1e-6);

        let notifications: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(notifications.len(), 3);
        match &notifications[2] {
            TrackingNotification::CrossCameraReid(event) => {
                assert!((event.similarity - 0.8).abs() < 1e-6);
                assert_eq!(event.prior_seen_at, t0());
                assert_eq!(event.to_camera, "hall");
            }
            other => panic!("unexpected notification {:?}", other),
        }
    }

    #[test]
    fn test_unconsumed_notifications_queue_without_blocking() {
        let clock = Arc::new(ManualClock::new(t0()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let engine = engine(clock).with_notifications(tx);

        for i in 0..1000 {
            engine.record_sighting(&sighting("p", "lobby", "z1", 0.9, t0() + Duration::milliseconds(i)));
        }
        assert_eq!(std::iter::from_fn(|| rx.try_recv().ok()).count(), 1000);
    }

    #[test]
    fn test_closed_channel_does_not_fail_sighting() {
        let clock = Arc::new(ManualClock::new(t0()));
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let engine = engine(clock).with_notifications(tx);

        let snapshot = engine.record_sighting(&sighting("p", "lobby", "z1", 0.9, t0()));
        assert_eq!(snapshot.sighting_count, 1);
    }
}
