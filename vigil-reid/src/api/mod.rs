//! HTTP API handlers for vigil-reid
//!
//! Diagnostics (`/health`, `/sessions`), ingest (`/sightings`, `/probes`), gallery and
//! topology administration, and the `/events` SSE stream.

pub mod gallery;
pub mod health;
pub mod ingest;
pub mod sessions;
pub mod sse;
pub mod topology;

pub use gallery::gallery_routes;
pub use health::health_routes;
pub use ingest::ingest_routes;
pub use sessions::session_routes;
pub use sse::event_routes;
pub use topology::topology_routes;
