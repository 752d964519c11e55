//! Transactional event outbox
//!
//! Domain writes and their event rows commit together ([`store::enqueue`] runs on the
//! caller's transaction). The [`OutboxDispatcher`] drains dispatchable rows to a
//! [`crate::publisher::ScopePublisher`] with at-least-once delivery.

pub mod dispatcher;
pub mod model;
pub mod notifier;
pub mod store;

pub use dispatcher::{DispatchStats, OutboxDispatcher};
pub use model::{EnqueueOutcome, NewOutboxMessage, OutboxMessage, OutboxStatus, StatusCounts};
pub use notifier::OutboxNotifier;
pub use store::{enqueue, OutboxStore, SqliteOutboxStore};

/// `aggregate_type` of events about a person's tracking session
pub const AGGREGATE_TRACKING_SESSION: &str = "tracking_session";

/// `aggregate_type` of events about the camera topology
pub const AGGREGATE_TOPOLOGY: &str = "camera_topology";
