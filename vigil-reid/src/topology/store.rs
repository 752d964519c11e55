//! Topology persistence
//!
//! `camera_zones`, `camera_edges` and `topology_settings` hold the declarative topology.
//! Edges are stored directed; a bidirectional edge becomes two rows. Every reload bumps
//! the `version` setting and queues a `system/status` event for operators in the same
//! transaction.

use super::{normalize_id, CameraEdge, CameraTopology, CameraZone, TopologyConfig, TopologyHandle};
use crate::outbox::{enqueue, NewOutboxMessage, AGGREGATE_TOPOLOGY};
use crate::utils::retry_on_lock;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tracing::info;
use vigil_common::config::load_toml_file;
use vigil_common::events::{event_names, Scope, StatusPayload, Topic};
use vigil_common::{time, Result};

const SETTING_SAME_ZONE: &str = "same_zone_is_neighbor";
const SETTING_VERSION: &str = "version";

/// What a reload installed
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReloadSummary {
    pub version: i64,
    pub cameras: usize,
    pub edges: usize,
    pub same_zone_is_neighbor: bool,
}

/// SQLite-backed topology configuration
#[derive(Clone)]
pub struct TopologyStore {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl TopologyStore {
    pub fn new(pool: SqlitePool, max_lock_wait_ms: u64) -> Self {
        Self {
            pool,
            max_lock_wait_ms,
        }
    }

    /// Read the stored topology (ids as stored, edges directed)
    pub async fn load(&self) -> Result<TopologyConfig> {
        let cameras = sqlx::query("SELECT camera_id, zone_id FROM camera_zones ORDER BY camera_id")
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|row| {
                Ok(CameraZone {
                    id: row.try_get("camera_id")?,
                    zone: row.try_get("zone_id")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let edges = sqlx::query(
            "SELECT from_camera, to_camera, travel_seconds FROM camera_edges ORDER BY from_camera, to_camera",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| {
            Ok(CameraEdge {
                from: row.try_get("from_camera")?,
                to: row.try_get("to_camera")?,
                travel_seconds: row.try_get("travel_seconds")?,
                bidirectional: false,
            })
        })
        .collect::<Result<Vec<_>>>()?;

        let same_zone: Option<String> =
            sqlx::query_scalar("SELECT value FROM topology_settings WHERE key = ?")
                .bind(SETTING_SAME_ZONE)
                .fetch_optional(&self.pool)
                .await?;

        Ok(TopologyConfig {
            same_zone_is_neighbor: same_zone.map(|v| v == "true").unwrap_or(true),
            cameras,
            edges,
        })
    }

    /// Replace the stored topology with `config` in one transaction
    pub async fn replace(&self, config: &TopologyConfig) -> Result<()> {
        retry_on_lock("topology replace", self.max_lock_wait_ms, || async move {
            let mut tx = self.pool.begin().await?;

            sqlx::query("DELETE FROM camera_zones").execute(&mut *tx).await?;
            sqlx::query("DELETE FROM camera_edges").execute(&mut *tx).await?;

            for camera in &config.cameras {
                sqlx::query("INSERT OR REPLACE INTO camera_zones (camera_id, zone_id) VALUES (?, ?)")
                    .bind(normalize_id(&camera.id))
                    .bind(normalize_id(&camera.zone))
                    .execute(&mut *tx)
                    .await?;
            }

            for edge in &config.edges {
                let from = normalize_id(&edge.from);
                let to = normalize_id(&edge.to);
                let mut directed = vec![(from.clone(), to.clone())];
                if edge.bidirectional {
                    directed.push((to, from));
                }
                for (from, to) in directed {
                    sqlx::query(
                        r#"
                        INSERT INTO camera_edges (from_camera, to_camera, travel_seconds)
                        VALUES (?, ?, ?)
                        ON CONFLICT (from_camera, to_camera)
                        DO UPDATE SET travel_seconds = excluded.travel_seconds
                        "#,
                    )
                    .bind(from)
                    .bind(to)
                    .bind(edge.travel_seconds)
                    .execute(&mut *tx)
                    .await?;
                }
            }

            sqlx::query("INSERT OR REPLACE INTO topology_settings (key, value) VALUES (?, ?)")
                .bind(SETTING_SAME_ZONE)
                .bind(if config.same_zone_is_neighbor { "true" } else { "false" })
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok(())
        })
        .await?;

        info!(
            cameras = config.cameras.len(),
            edges = config.edges.len(),
            "Stored camera topology"
        );
        Ok(())
    }

    /// Load a TOML topology file into the store
    pub async fn seed_from_file(&self, path: &Path) -> Result<TopologyConfig> {
        let config: TopologyConfig = load_toml_file(path)?;
        self.replace(&config).await?;
        info!(path = %path.display(), "Seeded camera topology from file");
        Ok(config)
    }

    /// Current reload counter (0 before the first reload)
    pub async fn version(&self) -> Result<i64> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM topology_settings WHERE key = ?")
                .bind(SETTING_VERSION)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value.and_then(|v| v.parse().ok()).unwrap_or(0))
    }

    /// Build a snapshot from the store and install it in `handle`
    pub async fn reload(&self, handle: &TopologyHandle) -> Result<ReloadSummary> {
        let config = self.load().await?;
        let topology = CameraTopology::from_config(&config);

        let snapshot = &topology;
        let version = retry_on_lock("topology reload", self.max_lock_wait_ms, move || {
            self.record_reload(snapshot)
        })
        .await?;

        let summary = ReloadSummary {
            version,
            cameras: topology.camera_count(),
            edges: topology.edge_count(),
            same_zone_is_neighbor: topology.same_zone_is_neighbor(),
        };
        handle.replace(topology);

        info!(
            version = summary.version,
            cameras = summary.cameras,
            edges = summary.edges,
            "Camera topology reloaded"
        );
        Ok(summary)
    }

    async fn record_reload(&self, topology: &CameraTopology) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let current: Option<String> =
            sqlx::query_scalar("SELECT value FROM topology_settings WHERE key = ?")
                .bind(SETTING_VERSION)
                .fetch_optional(&mut *tx)
                .await?;
        let version = current.and_then(|v| v.parse::<i64>().ok()).unwrap_or(0) + 1;

        sqlx::query("INSERT OR REPLACE INTO topology_settings (key, value) VALUES (?, ?)")
            .bind(SETTING_VERSION)
            .bind(version.to_string())
            .execute(&mut *tx)
            .await?;

        let payload = StatusPayload {
            component: "camera_topology".to_string(),
            status: "reloaded".to_string(),
            detail: Some(serde_json::json!({
                "version": version,
                "cameras": topology.camera_count(),
                "edges": topology.edge_count(),
                "same_zone_is_neighbor": topology.same_zone_is_neighbor(),
            })),
            at: time::now(),
        };
        let message = NewOutboxMessage::new(
            AGGREGATE_TOPOLOGY,
            version.to_string(),
            Topic::System,
            event_names::STATUS,
            Scope::Role("operator".to_string()),
            &payload,
        )?
        .with_idempotency_key(format!("topology:reload:{}", version));
        enqueue(&mut *tx, &message).await?;

        tx.commit().await?;
        Ok(version)
    }
}
