//! Integration tests for the transactional outbox
//!
//! Enqueue semantics (idempotency, transaction coupling), status transitions,
//! dead-lettering, notifier persistence and dispatcher behavior.

mod helpers;

use chrono::Duration;
use helpers::{t0, test_pool, RecordingPublisher};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use vigil_common::events::{event_names, Scope, Topic};
use vigil_common::Error;
use vigil_reid::config::OutboxConfig;
use vigil_reid::outbox::{
    enqueue, EnqueueOutcome, NewOutboxMessage, OutboxDispatcher, OutboxNotifier, OutboxStatus,
    OutboxStore, SqliteOutboxStore,
};
use vigil_reid::tracking::{CrossCameraReid, SightingRecorded, TrackingNotification};

fn message(event: &str, scope: Scope) -> NewOutboxMessage {
    NewOutboxMessage::new(
        "tracking_session",
        "p1",
        Topic::Camera,
        event,
        scope,
        &json!({"person_id": "p1"}),
    )
    .unwrap()
}

async fn store_with(config: OutboxConfig) -> SqliteOutboxStore {
    SqliteOutboxStore::new(test_pool().await, &config)
}

async fn count(store: &SqliteOutboxStore, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(store.pool())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_idempotency_key_admits_one_row() {
    let store = store_with(OutboxConfig::default()).await;
    let msg = message("tracking", Scope::Camera("lobby".into())).with_idempotency_key("k-1");

    let first = store.enqueue_standalone(&msg).await.unwrap();
    assert!(matches!(first, EnqueueOutcome::Inserted(_)));
    assert_eq!(store.enqueue_standalone(&msg).await.unwrap(), EnqueueOutcome::Duplicate);

    // Still a duplicate once the original is terminal
    if let EnqueueOutcome::Inserted(id) = first {
        store.mark_processed(id).await.unwrap();
    }
    assert_eq!(store.enqueue_standalone(&msg).await.unwrap(), EnqueueOutcome::Duplicate);
    assert_eq!(count(&store, "outbox_messages").await, 1);
}

#[tokio::test]
async fn test_messages_without_key_are_never_duplicates() {
    let store = store_with(OutboxConfig::default()).await;
    let msg = message("tracking", Scope::Global);

    store.enqueue_standalone(&msg).await.unwrap();
    store.enqueue_standalone(&msg).await.unwrap();
    assert_eq!(count(&store, "outbox_messages").await, 2);
}

#[tokio::test]
async fn test_enqueue_rolls_back_with_its_transaction() {
    let store = store_with(OutboxConfig::default()).await;

    let mut tx = store.pool().begin().await.unwrap();
    let outcome = enqueue(&mut *tx, &message("tracking", Scope::Global)).await.unwrap();
    assert!(matches!(outcome, EnqueueOutcome::Inserted(_)));
    tx.rollback().await.unwrap();

    assert_eq!(count(&store, "outbox_messages").await, 0);
}

#[tokio::test]
async fn test_dequeue_orders_by_occurred_at_and_skips_terminal() {
    let store = store_with(OutboxConfig::default()).await;

    let late = message("late", Scope::Global).occurred_at(t0() + Duration::seconds(30));
    let early = message("early", Scope::Global).occurred_at(t0());
    let middle = message("middle", Scope::Global).occurred_at(t0() + Duration::seconds(10));
    let done = message("done", Scope::Global).occurred_at(t0() - Duration::seconds(5));

    for msg in [&late, &early, &middle] {
        store.enqueue_standalone(msg).await.unwrap();
    }
    if let EnqueueOutcome::Inserted(id) = store.enqueue_standalone(&done).await.unwrap() {
        store.mark_processed(id).await.unwrap();
    }

    let batch = store.dequeue_batch(10).await.unwrap();
    let events: Vec<&str> = batch.iter().map(|m| m.event.as_str()).collect();
    assert_eq!(events, vec!["early", "middle", "late"]);

    // Failed rows stay eligible, behind every pending row
    store.mark_failed(batch[0].id, "boom").await.unwrap();
    let batch = store.dequeue_batch(3).await.unwrap();
    let events: Vec<&str> = batch.iter().map(|m| m.event.as_str()).collect();
    assert_eq!(events, vec!["middle", "late", "early"]);
    assert_eq!(batch[2].status, OutboxStatus::Failed);
}

#[tokio::test]
async fn test_failure_then_success_transitions() {
    let store = store_with(OutboxConfig { max_error_len: 8, ..Default::default() }).await;
    let EnqueueOutcome::Inserted(id) = store
        .enqueue_standalone(&message("tracking", Scope::Global))
        .await
        .unwrap()
    else {
        panic!("expected insert");
    };

    let status = store.mark_failed(id, "connection reset by peer").await.unwrap();
    assert_eq!(status, OutboxStatus::Failed);

    let row = store.get(id).await.unwrap().unwrap();
    assert_eq!(row.attempts, 1);
    assert_eq!(row.last_error.as_deref(), Some("connecti"));
    assert!(row.processed_at.is_none());

    store.mark_processed(id).await.unwrap();
    let row = store.get(id).await.unwrap().unwrap();
    assert_eq!(row.status, OutboxStatus::Processed);
    assert!(row.processed_at.is_some());

    // Terminal rows ignore further transitions
    assert_eq!(store.mark_failed(id, "late failure").await.unwrap(), OutboxStatus::Processed);
    let row = store.get(id).await.unwrap().unwrap();
    assert_eq!(row.attempts, 1);
    assert_eq!(row.status, OutboxStatus::Processed);
}

#[tokio::test]
async fn test_failed_rows_always_carry_attempts() {
    let store = store_with(OutboxConfig::default()).await;
    for i in 0..5 {
        let msg = message("tracking", Scope::Global).with_idempotency_key(format!("k{}", i));
        store.enqueue_standalone(&msg).await.unwrap();
    }
    for row in store.dequeue_batch(10).await.unwrap().iter().step_by(2) {
        store.mark_failed(row.id, "nope").await.unwrap();
    }

    for row in store.all().await.unwrap() {
        match row.status {
            OutboxStatus::Failed => assert!(row.attempts >= 1),
            OutboxStatus::Pending => assert_eq!(row.attempts, 0),
            other => panic!("unexpected status {}", other),
        }
    }
}

#[tokio::test]
async fn test_dead_letter_after_max_attempts() {
    let store = store_with(OutboxConfig { max_attempts: 3, ..Default::default() }).await;
    let EnqueueOutcome::Inserted(id) = store
        .enqueue_standalone(&message("tracking", Scope::Global))
        .await
        .unwrap()
    else {
        panic!("expected insert");
    };

    assert_eq!(store.mark_failed(id, "1").await.unwrap(), OutboxStatus::Failed);
    assert_eq!(store.mark_failed(id, "2").await.unwrap(), OutboxStatus::Failed);
    assert_eq!(store.mark_failed(id, "3").await.unwrap(), OutboxStatus::Dead);

    assert!(store.dequeue_batch(10).await.unwrap().is_empty());
    let counts = store.status_counts().await.unwrap();
    assert_eq!(counts.dead, 1);
    assert_eq!(counts.backlog(), 0);
}

#[tokio::test]
async fn test_zero_max_attempts_retries_forever() {
    let store = store_with(OutboxConfig { max_attempts: 0, ..Default::default() }).await;
    let EnqueueOutcome::Inserted(id) = store
        .enqueue_standalone(&message("tracking", Scope::Global))
        .await
        .unwrap()
    else {
        panic!("expected insert");
    };

    for _ in 0..20 {
        assert_eq!(store.mark_failed(id, "again").await.unwrap(), OutboxStatus::Failed);
    }
    assert_eq!(store.get(id).await.unwrap().unwrap().attempts, 20);
}

#[tokio::test]
async fn test_unknown_message_is_not_found() {
    let store = store_with(OutboxConfig::default()).await;
    assert!(matches!(store.mark_processed(999).await, Err(Error::NotFound(_))));
    assert!(matches!(store.mark_failed(999, "x").await, Err(Error::NotFound(_))));
}

fn recorded_sighting() -> SightingRecorded {
    SightingRecorded {
        person_id: "p1".into(),
        profile_id: 7,
        camera_id: Some("lobby".into()),
        zone_id: Some("z1".into()),
        similarity: 0.91,
        avg_similarity: 0.91,
        seen_cameras: 1,
        seen_at: t0(),
    }
}

#[tokio::test]
async fn test_notifier_writes_domain_row_and_event_together() {
    let store = store_with(OutboxConfig::default()).await;
    let notifier = OutboxNotifier::new(store.pool().clone(), 1000);
    let notification = TrackingNotification::Sighting(recorded_sighting());

    let outcome = notifier.persist(&notification).await.unwrap();
    assert!(matches!(outcome, EnqueueOutcome::Inserted(_)));
    assert_eq!(notifier.persist(&notification).await.unwrap(), EnqueueOutcome::Duplicate);

    assert_eq!(count(&store, "sightings").await, 1);
    assert_eq!(count(&store, "outbox_messages").await, 1);

    let row = &store.all().await.unwrap()[0];
    assert_eq!(row.topic, "camera");
    assert_eq!(row.event, event_names::TRACKING);
    assert_eq!(row.decode_scope().unwrap(), Scope::Camera("lobby".into()));
    assert_eq!(row.occurred_at, t0());
    let payload = row.decode_payload().unwrap();
    assert_eq!(payload["person_id"], "p1");
    assert_eq!(payload["camera_id"], "lobby");
}

#[tokio::test]
async fn test_notifier_run_drains_channel_on_cancel() {
    let store = store_with(OutboxConfig::default()).await;
    let notifier = OutboxNotifier::new(store.pool().clone(), 1000);
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    tx.send(TrackingNotification::Sighting(recorded_sighting())).unwrap();
    tx.send(TrackingNotification::CrossCameraReid(CrossCameraReid {
        person_id: "p1".into(),
        profile_id: 7,
        from_camera: "lobby".into(),
        to_camera: "hall".into(),
        zone_id: Some("z1".into()),
        travel_seconds: 8.0,
        similarity: 0.91,
        prior_seen_at: t0(),
        detected_at: t0() + Duration::seconds(8),
    }))
    .unwrap();
    cancel.cancel();

    notifier.run(rx, cancel).await;

    assert_eq!(count(&store, "sightings").await, 1);
    assert_eq!(count(&store, "reid_events").await, 1);
    let events: Vec<String> = store.all().await.unwrap().into_iter().map(|m| m.event).collect();
    assert!(events.contains(&event_names::CROSS_CAMERA_REID.to_string()));
    drop(tx);
}

#[tokio::test]
async fn test_dispatch_batch_isolates_failures() {
    let store = store_with(OutboxConfig::default()).await;

    store.enqueue_standalone(&message("tracking", Scope::Camera("lobby".into())).occurred_at(t0())).await.unwrap();
    store
        .enqueue_standalone(&message("cross_camera_reid", Scope::Global).occurred_at(t0() + Duration::seconds(1)))
        .await
        .unwrap();
    store
        .enqueue_standalone(&message("status", Scope::Role("operator".into())).occurred_at(t0() + Duration::seconds(2)))
        .await
        .unwrap();
    // Undecodable scope: camera without a key
    sqlx::query(
        r#"
        INSERT INTO outbox_messages
            (aggregate_type, aggregate_id, topic, event, scope, scope_key, payload, occurred_at)
        VALUES ('x', 'y', 'camera', 'tracking', 'camera', NULL, '{}', '2026-03-01T09:00:03.000000Z')
        "#,
    )
    .execute(store.pool())
    .await
    .unwrap();

    let publisher = Arc::new(RecordingPublisher::failing_on(&["status"]));
    let dispatcher = OutboxDispatcher::new(
        Arc::new(store.clone()),
        publisher.clone(),
        OutboxConfig::default(),
    );

    let stats = dispatcher.dispatch_batch().await.unwrap();
    assert_eq!(stats.fetched, 4);
    assert_eq!(stats.published, 2);
    assert_eq!(stats.failed, 2);

    let published = publisher.published();
    assert_eq!(published[0].scope, Scope::Camera("lobby".into()));
    assert_eq!(published[1].scope, Scope::Global);
    assert_eq!(published[1].event, "cross_camera_reid");

    let counts = store.status_counts().await.unwrap();
    assert_eq!(counts.processed, 2);
    assert_eq!(counts.failed, 2);

    let failed: Vec<_> = store
        .all()
        .await
        .unwrap()
        .into_iter()
        .filter(|m| m.status == OutboxStatus::Failed)
        .collect();
    assert!(failed.iter().all(|m| m.attempts == 1 && m.last_error.is_some()));
}

#[tokio::test]
async fn test_failing_rows_do_not_starve_newer_events() {
    let config = OutboxConfig {
        batch_size: 2,
        max_attempts: 0,
        ..Default::default()
    };
    let store = store_with(config.clone()).await;
    store.enqueue_standalone(&message("bad", Scope::Global).occurred_at(t0())).await.unwrap();
    store
        .enqueue_standalone(&message("bad", Scope::Global).occurred_at(t0() + Duration::seconds(1)))
        .await
        .unwrap();
    store
        .enqueue_standalone(&message("good", Scope::Global).occurred_at(t0() + Duration::seconds(2)))
        .await
        .unwrap();

    let publisher = Arc::new(RecordingPublisher::failing_on(&["bad"]));
    let dispatcher = OutboxDispatcher::new(Arc::new(store.clone()), publisher.clone(), config);

    // The first batch is filled by the two oldest rows, both of which fail
    assert_eq!(dispatcher.dispatch_batch().await.unwrap().failed, 2);
    // The next one leads with the pending row; the remaining slot retries the oldest failure
    let stats = dispatcher.dispatch_batch().await.unwrap();
    assert_eq!(stats.published, 1);
    assert_eq!(stats.failed, 1);

    let published = publisher.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].event, "good");

    // The failing rows are still retried once nothing is pending
    let batch = store.dequeue_batch(10).await.unwrap();
    assert_eq!(batch.len(), 2);
    let attempts: Vec<u32> = batch.iter().map(|m| m.attempts).collect();
    assert_eq!(attempts, vec![2, 1]);
    assert!(batch.iter().all(|m| m.event == "bad"));
}

#[tokio::test]
async fn test_dispatcher_dead_letters_persistent_failures() {
    let config = OutboxConfig { max_attempts: 2, ..Default::default() };
    let store = store_with(config.clone()).await;
    store.enqueue_standalone(&message("status", Scope::Global)).await.unwrap();

    let publisher = Arc::new(RecordingPublisher::failing_on(&["status"]));
    let dispatcher = OutboxDispatcher::new(Arc::new(store.clone()), publisher, config);

    assert_eq!(dispatcher.dispatch_batch().await.unwrap().failed, 1);
    assert_eq!(dispatcher.dispatch_batch().await.unwrap().dead, 1);
    assert_eq!(dispatcher.dispatch_batch().await.unwrap().fetched, 0);
}

#[tokio::test]
async fn test_dispatcher_run_delivers_and_stops() {
    let config = OutboxConfig { idle_poll_ms: 10, ..Default::default() };
    let store = store_with(config.clone()).await;
    let publisher = Arc::new(RecordingPublisher::default());
    let dispatcher = OutboxDispatcher::new(Arc::new(store.clone()), publisher.clone(), config);

    let cancel = CancellationToken::new();
    let task = tokio::spawn(dispatcher.run(cancel.clone()));

    store.enqueue_standalone(&message("tracking", Scope::Incident("42".into()))).await.unwrap();

    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while store.status_counts().await.unwrap().processed < 1 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("message should be dispatched");

    cancel.cancel();
    tokio::time::timeout(std::time::Duration::from_secs(5), task)
        .await
        .expect("dispatcher should stop")
        .unwrap();

    assert_eq!(publisher.published()[0].scope, Scope::Incident("42".into()));
}
