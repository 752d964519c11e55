//! Camera topology
//!
//! Read-mostly graph of camera → zone membership, neighbor sets and directed travel-time
//! bounds. An edge `from → to` means a person can walk from `from` to `to`, which makes
//! `from` a neighbor of `to`.
//!
//! Camera and zone ids are case-insensitive; they are normalized (trimmed, lowercased) on
//! the way in and every lookup normalizes its argument the same way.
//!
//! The live topology is an immutable [`CameraTopology`] snapshot held by a
//! [`TopologyHandle`]. Readers clone the `Arc` and release the lock immediately; a reload
//! builds a fresh snapshot and swaps it in.

pub mod store;

pub use store::{ReloadSummary, TopologyStore};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::warn;

/// Canonical form of a camera or zone id
pub fn normalize_id(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Normalize an optional id, mapping blank to `None`
pub fn normalize_opt(raw: Option<&str>) -> Option<String> {
    raw.map(normalize_id).filter(|id| !id.is_empty())
}

/// Camera zone membership entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraZone {
    pub id: String,
    pub zone: String,
}

/// Adjacency edge between two cameras
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraEdge {
    pub from: String,
    pub to: String,
    /// Upper bound on plausible travel time along this edge
    #[serde(default)]
    pub travel_seconds: Option<f64>,
    /// Also add the reverse edge with the same bound
    #[serde(default)]
    pub bidirectional: bool,
}

/// Declarative topology, as written in a TOML seed file or read back from the store
///
/// ```toml
/// same_zone_is_neighbor = true
///
/// [[cameras]]
/// id = "lobby"
/// zone = "z1"
///
/// [[edges]]
/// from = "lobby"
/// to = "hall"
/// travel_seconds = 12.0
/// bidirectional = true
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    pub same_zone_is_neighbor: bool,
    pub cameras: Vec<CameraZone>,
    pub edges: Vec<CameraEdge>,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            same_zone_is_neighbor: true,
            cameras: Vec::new(),
            edges: Vec::new(),
        }
    }
}

/// Immutable topology snapshot
#[derive(Debug, Clone, Default)]
pub struct CameraTopology {
    camera_to_zone: HashMap<String, String>,
    /// Destination camera → cameras with an edge into it
    adjacency: HashMap<String, BTreeSet<String>>,
    travel_seconds: HashMap<(String, String), f64>,
    same_zone_is_neighbor: bool,
    edge_count: usize,
}

impl CameraTopology {
    /// Build a snapshot from a declarative config
    ///
    /// Blank ids are dropped. Edges that mention cameras with no zone are kept (the
    /// camera is treated as having an unknown zone) and logged.
    pub fn from_config(config: &TopologyConfig) -> Self {
        let mut topology = CameraTopology {
            same_zone_is_neighbor: config.same_zone_is_neighbor,
            ..Default::default()
        };

        for camera in &config.cameras {
            let id = normalize_id(&camera.id);
            let zone = normalize_id(&camera.zone);
            if id.is_empty() || zone.is_empty() {
                warn!(camera_id = %camera.id, zone_id = %camera.zone, "Ignoring camera with blank id or zone");
                continue;
            }
            topology.camera_to_zone.insert(id, zone);
        }

        for edge in &config.edges {
            let from = normalize_id(&edge.from);
            let to = normalize_id(&edge.to);
            if from.is_empty() || to.is_empty() || from == to {
                warn!(from = %edge.from, to = %edge.to, "Ignoring degenerate topology edge");
                continue;
            }
            for camera in [&from, &to] {
                if !topology.camera_to_zone.contains_key(camera) {
                    warn!(camera_id = %camera, "Topology edge references camera with no zone");
                }
            }

            topology.add_edge(&from, &to, edge.travel_seconds);
            if edge.bidirectional {
                topology.add_edge(&to, &from, edge.travel_seconds);
            }
        }

        topology
    }

    fn add_edge(&mut self, from: &str, to: &str, travel_seconds: Option<f64>) {
        let inserted = self
            .adjacency
            .entry(to.to_string())
            .or_default()
            .insert(from.to_string());
        if inserted {
            self.edge_count += 1;
        }

        match travel_seconds {
            Some(secs) if secs.is_finite() && secs >= 0.0 => {
                self.travel_seconds
                    .insert((from.to_string(), to.to_string()), secs);
            }
            Some(secs) => {
                warn!(from, to, travel_seconds = secs, "Ignoring invalid travel time bound");
            }
            None => {}
        }
    }

    /// Zone the camera belongs to, if known
    pub fn zone_of(&self, camera_id: &str) -> Option<&str> {
        self.camera_to_zone
            .get(&normalize_id(camera_id))
            .map(String::as_str)
    }

    /// Cameras a person could plausibly have come from before appearing on `camera_id`
    ///
    /// Sources of edges into `camera_id` plus, when `same_zone_is_neighbor` is set, every
    /// other camera in the same zone. Never contains `camera_id` itself.
    pub fn neighbors(&self, camera_id: &str) -> BTreeSet<String> {
        let camera = normalize_id(camera_id);
        let mut neighbors = self.adjacency.get(&camera).cloned().unwrap_or_default();

        if self.same_zone_is_neighbor {
            if let Some(zone) = self.camera_to_zone.get(&camera) {
                neighbors.extend(
                    self.camera_to_zone
                        .iter()
                        .filter(|(_, z)| *z == zone)
                        .map(|(c, _)| c.clone()),
                );
            }
        }

        neighbors.remove(&camera);
        neighbors
    }

    /// Travel-time bound of the directed edge `from → to`, if one is defined
    pub fn travel_seconds(&self, from: &str, to: &str) -> Option<f64> {
        self.travel_seconds
            .get(&(normalize_id(from), normalize_id(to)))
            .copied()
    }

    pub fn camera_count(&self) -> usize {
        self.camera_to_zone.len()
    }

    /// Number of directed edges
    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn same_zone_is_neighbor(&self) -> bool {
        self.same_zone_is_neighbor
    }
}

/// Shared handle to the live topology snapshot
#[derive(Clone, Default)]
pub struct TopologyHandle {
    current: Arc<RwLock<Arc<CameraTopology>>>,
}

impl TopologyHandle {
    pub fn new(topology: CameraTopology) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(topology))),
        }
    }

    /// Current snapshot; stays valid (and unchanged) across later reloads
    pub fn snapshot(&self) -> Arc<CameraTopology> {
        self.current.read().clone()
    }

    /// Swap in a new snapshot, returning the previous one
    pub fn replace(&self, topology: CameraTopology) -> Arc<CameraTopology> {
        std::mem::replace(&mut *self.current.write(), Arc::new(topology))
    }
}
