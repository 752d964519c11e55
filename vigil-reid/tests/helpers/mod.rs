//! Shared fixtures for vigil-reid integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;
use vigil_common::db::{create_schema, init_memory_database};
use vigil_common::events::{Scope, Topic};
use vigil_common::ManualClock;
use vigil_reid::config::TrackingConfig;
use vigil_reid::publisher::{PublishError, ScopePublisher};
use vigil_reid::topology::{
    CameraEdge, CameraTopology, CameraZone, TopologyConfig, TopologyHandle,
};
use vigil_reid::tracking::{Sighting, TrackingEngine};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

pub async fn test_pool() -> SqlitePool {
    let pool = init_memory_database().await.unwrap();
    create_schema(&pool).await.unwrap();
    pool
}

/// lobby, hall (zone z1) and dock (zone z2)
///
/// lobby ↔ hall bounded at 12s, lobby ↔ dock bounded at 10s, hall → dock unbounded.
/// Same-zone cameras are not implicit neighbors.
pub fn site_topology() -> TopologyConfig {
    TopologyConfig {
        same_zone_is_neighbor: false,
        cameras: vec![
            CameraZone { id: "lobby".into(), zone: "z1".into() },
            CameraZone { id: "hall".into(), zone: "z1".into() },
            CameraZone { id: "dock".into(), zone: "z2".into() },
        ],
        edges: vec![
            CameraEdge {
                from: "lobby".into(),
                to: "hall".into(),
                travel_seconds: Some(12.0),
                bidirectional: true,
            },
            CameraEdge {
                from: "lobby".into(),
                to: "dock".into(),
                travel_seconds: Some(10.0),
                bidirectional: true,
            },
            CameraEdge {
                from: "hall".into(),
                to: "dock".into(),
                travel_seconds: None,
                bidirectional: false,
            },
        ],
    }
}

pub fn site_handle() -> TopologyHandle {
    TopologyHandle::new(CameraTopology::from_config(&site_topology()))
}

pub fn engine_at(clock: Arc<ManualClock>) -> TrackingEngine {
    TrackingEngine::new(site_handle(), TrackingConfig::default(), clock)
}

pub fn sighting(
    person: &str,
    camera: &str,
    zone: &str,
    similarity: f32,
    seen_at: DateTime<Utc>,
) -> Sighting {
    Sighting {
        person_id: person.to_string(),
        profile_id: 1,
        similarity,
        camera_id: Some(camera.to_string()),
        zone_id: Some(zone.to_string()),
        seen_at,
    }
}

/// One publish call as seen by [`RecordingPublisher`]
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub scope: Scope,
    pub topic: Topic,
    pub event: String,
    pub payload: Value,
}

/// Records publishes; events named in `failing` are rejected
#[derive(Default)]
pub struct RecordingPublisher {
    pub published: Mutex<Vec<Published>>,
    pub failing: Mutex<HashSet<String>>,
}

impl RecordingPublisher {
    pub fn failing_on(events: &[&str]) -> Self {
        let publisher = Self::default();
        publisher
            .failing
            .lock()
            .extend(events.iter().map(|e| e.to_string()));
        publisher
    }

    pub fn published(&self) -> Vec<Published> {
        self.published.lock().clone()
    }

    fn record(&self, scope: Scope, topic: Topic, event: &str, payload: Value) -> Result<(), PublishError> {
        if self.failing.lock().contains(event) {
            return Err(PublishError::Rejected(format!("{} refused", event)));
        }
        self.published.lock().push(Published {
            scope,
            topic,
            event: event.to_string(),
            payload,
        });
        Ok(())
    }
}

#[async_trait]
impl ScopePublisher for RecordingPublisher {
    async fn to_global(&self, topic: Topic, event: &str, payload: Value) -> Result<(), PublishError> {
        self.record(Scope::Global, topic, event, payload)
    }

    async fn to_user(&self, id: &str, topic: Topic, event: &str, payload: Value) -> Result<(), PublishError> {
        self.record(Scope::User(id.into()), topic, event, payload)
    }

    async fn to_operator(&self, id: &str, topic: Topic, event: &str, payload: Value) -> Result<(), PublishError> {
        self.record(Scope::Operator(id.into()), topic, event, payload)
    }

    async fn to_camera(&self, id: &str, topic: Topic, event: &str, payload: Value) -> Result<(), PublishError> {
        self.record(Scope::Camera(id.into()), topic, event, payload)
    }

    async fn to_role(&self, name: &str, topic: Topic, event: &str, payload: Value) -> Result<(), PublishError> {
        self.record(Scope::Role(name.into()), topic, event, payload)
    }

    async fn to_incident(&self, id: &str, topic: Topic, event: &str, payload: Value) -> Result<(), PublishError> {
        self.record(Scope::Incident(id.into()), topic, event, payload)
    }
}
