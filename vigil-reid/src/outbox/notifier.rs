//! Tracking notification persistence
//!
//! Consumes the engine's notification channel. Each notification becomes a domain row
//! (`sightings` or `reid_events`) plus its outbox row, written in one transaction. A
//! duplicate idempotency key rolls the transaction back, so a replayed notification
//! leaves neither row behind. Failures are logged and dropped; they never reach the
//! sighting caller.

use super::model::{EnqueueOutcome, NewOutboxMessage};
use super::store::enqueue;
use super::AGGREGATE_TRACKING_SESSION;
use crate::tracking::{CrossCameraReid, SightingRecorded, TrackingNotification};
use crate::utils::retry_on_lock;
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vigil_common::db::format_timestamp;
use vigil_common::events::{
    event_names, CrossCameraReidPayload, Scope, Topic, TrackingPayload,
};
use vigil_common::{time, Result};

/// Writes tracking notifications through the outbox
#[derive(Clone)]
pub struct OutboxNotifier {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

fn tracking_key(recorded: &SightingRecorded) -> String {
    format!(
        "tracking:{}:{}:{}",
        recorded.person_id,
        recorded.camera_id.as_deref().unwrap_or("-"),
        recorded.seen_at.timestamp_millis()
    )
}

fn reid_key(reid: &CrossCameraReid) -> String {
    format!(
        "reid:{}:{}:{}:{}",
        reid.person_id,
        reid.from_camera,
        reid.to_camera,
        reid.prior_seen_at.timestamp_millis()
    )
}

impl OutboxNotifier {
    pub fn new(pool: SqlitePool, max_lock_wait_ms: u64) -> Self {
        Self {
            pool,
            max_lock_wait_ms,
        }
    }

    /// Persist one notification and its outbox row atomically
    pub async fn persist(&self, notification: &TrackingNotification) -> Result<EnqueueOutcome> {
        match notification {
            TrackingNotification::Sighting(recorded) => {
                retry_on_lock("persist sighting", self.max_lock_wait_ms, || async move {
                    self.persist_sighting(recorded).await
                })
                .await
            }
            TrackingNotification::CrossCameraReid(reid) => {
                retry_on_lock("persist re-identification", self.max_lock_wait_ms, || async move {
                    self.persist_reid(reid).await
                })
                .await
            }
        }
    }

    async fn persist_sighting(&self, recorded: &SightingRecorded) -> Result<EnqueueOutcome> {
        let payload = TrackingPayload {
            person_id: recorded.person_id.clone(),
            profile_id: recorded.profile_id,
            camera_id: recorded.camera_id.clone(),
            zone_id: recorded.zone_id.clone(),
            similarity: recorded.similarity,
            avg_similarity: recorded.avg_similarity,
            seen_cameras: recorded.seen_cameras,
            seen_at: recorded.seen_at,
        };
        let scope = match &recorded.camera_id {
            Some(camera) => Scope::Camera(camera.clone()),
            None => Scope::Global,
        };
        let message = NewOutboxMessage::new(
            AGGREGATE_TRACKING_SESSION,
            &recorded.person_id,
            Topic::Camera,
            event_names::TRACKING,
            scope,
            &payload,
        )?
        .occurred_at(recorded.seen_at)
        .with_idempotency_key(tracking_key(recorded));

        let mut tx = self.pool.begin().await?;
        let outcome = enqueue(&mut *tx, &message).await?;
        if outcome.is_duplicate() {
            tx.rollback().await?;
            return Ok(outcome);
        }

        sqlx::query(
            r#"
            INSERT INTO sightings
                (person_id, profile_id, camera_id, zone_id, similarity, seen_at, recorded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&recorded.person_id)
        .bind(recorded.profile_id)
        .bind(recorded.camera_id.as_deref())
        .bind(recorded.zone_id.as_deref())
        .bind(recorded.similarity as f64)
        .bind(format_timestamp(&recorded.seen_at))
        .bind(format_timestamp(&time::now()))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(outcome)
    }

    async fn persist_reid(&self, reid: &CrossCameraReid) -> Result<EnqueueOutcome> {
        let payload = CrossCameraReidPayload {
            person_id: reid.person_id.clone(),
            profile_id: reid.profile_id,
            from_camera: reid.from_camera.clone(),
            to_camera: reid.to_camera.clone(),
            zone_id: reid.zone_id.clone(),
            travel_seconds: reid.travel_seconds,
            similarity: reid.similarity,
            detected_at: reid.detected_at,
        };
        let message = NewOutboxMessage::new(
            AGGREGATE_TRACKING_SESSION,
            &reid.person_id,
            Topic::Camera,
            event_names::CROSS_CAMERA_REID,
            Scope::Global,
            &payload,
        )?
        .occurred_at(reid.detected_at)
        .with_idempotency_key(reid_key(reid));

        let mut tx = self.pool.begin().await?;
        let outcome = enqueue(&mut *tx, &message).await?;
        if outcome.is_duplicate() {
            tx.rollback().await?;
            return Ok(outcome);
        }

        sqlx::query(
            r#"
            INSERT INTO reid_events
                (person_id, profile_id, from_camera, to_camera, zone_id,
                 travel_seconds, similarity, detected_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&reid.person_id)
        .bind(reid.profile_id)
        .bind(&reid.from_camera)
        .bind(&reid.to_camera)
        .bind(reid.zone_id.as_deref())
        .bind(reid.travel_seconds)
        .bind(reid.similarity as f64)
        .bind(format_timestamp(&reid.detected_at))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(outcome)
    }

    async fn handle(&self, notification: TrackingNotification) {
        match self.persist(&notification).await {
            Ok(EnqueueOutcome::Inserted(id)) => debug!(outbox_id = id, "Queued tracking event"),
            Ok(EnqueueOutcome::Duplicate) => debug!("Tracking event already queued"),
            Err(e) => warn!(error = %e, notification = ?notification, "Failed to persist tracking event"),
        }
    }

    /// Persist notifications until `cancel` fires or every sender is gone
    ///
    /// On cancel, notifications already in the channel are still written.
    pub async fn run(
        self,
        mut rx: mpsc::UnboundedReceiver<TrackingNotification>,
        cancel: CancellationToken,
    ) {
        info!("Outbox notifier started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = rx.recv() => match next {
                    Some(notification) => self.handle(notification).await,
                    None => break,
                },
            }
        }

        rx.close();
        while let Ok(notification) = rx.try_recv() {
            self.handle(notification).await;
        }

        info!("Outbox notifier stopped");
    }
}
