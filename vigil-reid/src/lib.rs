//! vigil-reid library interface
//!
//! Cross-camera identity re-identification: similarity matching against an enrolled
//! gallery, live per-person tracking sessions constrained by a camera topology, and a
//! transactional outbox that delivers the resulting events to scope-addressed
//! subscribers.

pub mod api;
pub mod config;
pub mod error;
pub mod gallery;
pub mod matcher;
pub mod outbox;
pub mod pipeline;
pub mod publisher;
pub mod topology;
pub mod tracking;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use vigil_common::events::EventBus;
use vigil_common::Clock;

use crate::config::ReidConfig;
use crate::gallery::FaceGallery;
use crate::outbox::SqliteOutboxStore;
use crate::pipeline::SightingPipeline;
use crate::topology::{TopologyHandle, TopologyStore};
use crate::tracking::{TrackingEngine, TrackingNotification};

/// Envelopes buffered per SSE subscriber before it starts lagging
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Application state shared across handlers and background tasks
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Live tracking sessions
    pub engine: Arc<TrackingEngine>,
    /// Matcher + engine entry point for ingest
    pub pipeline: Arc<SightingPipeline>,
    /// Live topology snapshot (shared with the engine)
    pub topology: TopologyHandle,
    /// Stored topology configuration
    pub topology_store: TopologyStore,
    /// Outbox (dispatcher side and diagnostics)
    pub outbox: SqliteOutboxStore,
    /// Push envelopes for SSE clients
    pub event_bus: EventBus,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// Wire engine, gallery, pipeline and stores over `db`
    ///
    /// Returns the receiving end of the engine's notification channel; hand it to an
    /// [`outbox::OutboxNotifier`]. The topology starts empty until the first reload.
    pub fn new(
        db: SqlitePool,
        config: &ReidConfig,
        clock: Arc<dyn Clock>,
    ) -> (Self, mpsc::UnboundedReceiver<TrackingNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let topology = TopologyHandle::default();

        let engine = Arc::new(
            TrackingEngine::new(topology.clone(), config.tracking.clone(), clock)
                .with_notifications(tx),
        );
        let pipeline = Arc::new(SightingPipeline::new(
            engine.clone(),
            FaceGallery::new(db.clone()),
            config.matching.clone(),
            config.tracking.clone(),
        ));

        let state = Self {
            topology_store: TopologyStore::new(db.clone(), config.outbox.max_lock_wait_ms),
            outbox: SqliteOutboxStore::new(db.clone(), &config.outbox),
            event_bus: EventBus::new(EVENT_BUS_CAPACITY),
            startup_time: Utc::now(),
            db,
            engine,
            pipeline,
            topology,
        };

        (state, rx)
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::session_routes())
        .merge(api::ingest_routes())
        .merge(api::gallery_routes())
        .merge(api::topology_routes())
        .merge(api::event_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
