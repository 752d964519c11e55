//! Event types for the Vigil event system
//!
//! Provides the topic/scope taxonomy, domain event payloads, the envelope handed to the
//! live push layer, and the in-process EventBus that fans envelopes out to subscribers.

mod payloads;
mod scope;

pub use payloads::{CrossCameraReidPayload, StatusPayload, TrackingPayload};
pub use scope::{event_names, Scope, Topic};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// One event as delivered to the live push layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEnvelope {
    pub topic: Topic,
    pub event: String,
    pub scope: Scope,
    pub payload: serde_json::Value,
    pub published_at: DateTime<Utc>,
}

/// Central event distribution bus
///
/// Thin wrapper over `tokio::sync::broadcast`. Slow subscribers lag and lose the oldest
/// envelopes; publishers never block.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PushEnvelope>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of envelopes buffered per subscriber before lagging
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future envelopes
    pub fn subscribe(&self) -> broadcast::Receiver<PushEnvelope> {
        self.tx.subscribe()
    }

    /// Emit an envelope to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists, `Err` otherwise.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        envelope: PushEnvelope,
    ) -> Result<usize, broadcast::error::SendError<PushEnvelope>> {
        self.tx.send(envelope)
    }

    /// Emit, ignoring the no-subscriber case
    pub fn emit_lossy(&self, envelope: PushEnvelope) {
        let _ = self.tx.send(envelope);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
