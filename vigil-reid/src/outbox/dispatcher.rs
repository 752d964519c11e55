//! Outbox dispatcher
//!
//! Single logical worker draining dispatchable rows in `occurred_at` order. Every row is
//! handled on its own: a decode or publish failure marks that row failed and the batch
//! carries on. A failure of the batch read itself backs off and retries the loop.
//!
//! Delivery is at-least-once: a crash between publish and `mark_processed` republishes
//! the row on the next start.

use super::model::{OutboxMessage, OutboxStatus};
use super::store::OutboxStore;
use crate::config::OutboxConfig;
use crate::publisher::{publish_to_scope, ScopePublisher};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vigil_common::Result;

/// Outcome counts of one dispatch pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub fetched: usize,
    pub published: usize,
    pub failed: usize,
    pub dead: usize,
}

/// Drains the outbox to a scope publisher
pub struct OutboxDispatcher {
    store: Arc<dyn OutboxStore>,
    publisher: Arc<dyn ScopePublisher>,
    config: OutboxConfig,
}

impl OutboxDispatcher {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        publisher: Arc<dyn ScopePublisher>,
        config: OutboxConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            config,
        }
    }

    /// Publish one row; the error string is what gets recorded on failure
    async fn deliver(&self, message: &OutboxMessage) -> std::result::Result<(), String> {
        let topic = message.decode_topic().map_err(|e| e.to_string())?;
        let scope = message.decode_scope().map_err(|e| e.to_string())?;
        let payload = message.decode_payload().map_err(|e| e.to_string())?;

        publish_to_scope(self.publisher.as_ref(), &scope, topic, &message.event, payload)
            .await
            .map_err(|e| e.to_string())
    }

    /// One pass: dequeue a batch, publish each row, record each outcome
    ///
    /// Only a failed dequeue is returned as an error. A failed status update is logged
    /// and the row is picked up again on a later pass.
    pub async fn dispatch_batch(&self) -> Result<DispatchStats> {
        let batch = self.store.dequeue_batch(self.config.batch_size).await?;
        let mut stats = DispatchStats {
            fetched: batch.len(),
            ..Default::default()
        };

        for message in &batch {
            match self.deliver(message).await {
                Ok(()) => match self.store.mark_processed(message.id).await {
                    Ok(()) => stats.published += 1,
                    Err(e) => error!(id = message.id, error = %e, "Failed to mark outbox message processed"),
                },
                Err(reason) => {
                    warn!(
                        id = message.id,
                        event = %message.event,
                        attempts = message.attempts + 1,
                        error = %reason,
                        "Outbox message delivery failed"
                    );
                    match self.store.mark_failed(message.id, &reason).await {
                        Ok(OutboxStatus::Dead) => {
                            stats.dead += 1;
                            error!(id = message.id, event = %message.event, "Outbox message dead-lettered");
                        }
                        Ok(_) => stats.failed += 1,
                        Err(e) => error!(id = message.id, error = %e, "Failed to mark outbox message failed"),
                    }
                }
            }
        }

        Ok(stats)
    }

    /// Dispatch until `cancel` fires
    ///
    /// Cancellation is observed between passes and during waits, never mid-batch.
    pub async fn run(self, cancel: CancellationToken) {
        info!(batch_size = self.config.batch_size, "Outbox dispatcher started");

        while !cancel.is_cancelled() {
            let wait = match self.dispatch_batch().await {
                Ok(stats) => {
                    if stats.fetched > 0 {
                        debug!(?stats, "Outbox dispatch pass");
                    }
                    // Go straight on only while full batches keep making progress
                    let full = stats.fetched >= self.config.batch_size as usize;
                    if full && stats.published > 0 {
                        Duration::ZERO
                    } else {
                        self.config.idle_poll()
                    }
                }
                Err(e) => {
                    error!(error = %e, "Outbox dispatch pass failed; backing off");
                    self.config.error_backoff()
                }
            };

            if wait.is_zero() {
                tokio::task::yield_now().await;
                continue;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        info!("Outbox dispatcher stopped");
    }
}
