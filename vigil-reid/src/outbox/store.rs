//! Outbox persistence
//!
//! Writers call [`enqueue`] on the connection of the transaction that carries the domain
//! write, so the event row commits or rolls back together with the fact it describes.
//! The dispatcher side goes through the [`OutboxStore`] trait.

use super::model::{EnqueueOutcome, NewOutboxMessage, OutboxMessage, OutboxStatus, StatusCounts};
use crate::config::OutboxConfig;
use crate::utils::retry_on_lock;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;
use vigil_common::db::{format_timestamp, parse_timestamp};
use vigil_common::{time, Error, Result};

/// Write one pending row on `conn` (normally an open transaction)
///
/// A colliding idempotency key is a soft skip: nothing is written and
/// [`EnqueueOutcome::Duplicate`] is returned, whatever the status of the existing row.
pub async fn enqueue(
    conn: &mut SqliteConnection,
    message: &NewOutboxMessage,
) -> Result<EnqueueOutcome> {
    let result = sqlx::query(
        r#"
        INSERT INTO outbox_messages
            (aggregate_type, aggregate_id, topic, event, scope, scope_key,
             idempotency_key, payload, occurred_at, status, attempts)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', 0)
        ON CONFLICT (idempotency_key) DO NOTHING
        "#,
    )
    .bind(&message.aggregate_type)
    .bind(&message.aggregate_id)
    .bind(message.topic.as_str())
    .bind(&message.event)
    .bind(message.scope.kind())
    .bind(message.scope.key())
    .bind(message.idempotency_key.as_deref())
    .bind(serde_json::to_string(&message.payload)?)
    .bind(format_timestamp(&message.occurred_at))
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        debug!(
            idempotency_key = ?message.idempotency_key,
            event = %message.event,
            "Skipping duplicate outbox event"
        );
        return Ok(EnqueueOutcome::Duplicate);
    }

    Ok(EnqueueOutcome::Inserted(result.last_insert_rowid()))
}

/// Dispatcher-facing outbox operations
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Up to `batch_size` dispatchable rows, oldest `occurred_at` first
    ///
    /// Pending rows come before failed retries, so rows that keep failing never hold
    /// back newer events.
    async fn dequeue_batch(&self, batch_size: u32) -> Result<Vec<OutboxMessage>>;

    /// Terminal success. Already-terminal rows are left untouched.
    async fn mark_processed(&self, id: i64) -> Result<()>;

    /// Record a failed attempt; returns the row's resulting status
    /// (`Failed`, or `Dead` once the attempt cap is reached)
    async fn mark_failed(&self, id: i64, error: &str) -> Result<OutboxStatus>;

    async fn status_counts(&self) -> Result<StatusCounts>;
}

/// Cut `error` to at most `max_chars` characters
pub fn truncate_error(error: &str, max_chars: usize) -> String {
    match error.char_indices().nth(max_chars) {
        Some((byte_index, _)) => error[..byte_index].to_string(),
        None => error.to_string(),
    }
}

/// SQLite-backed outbox
#[derive(Clone)]
pub struct SqliteOutboxStore {
    pool: SqlitePool,
    max_attempts: u32,
    max_error_len: usize,
    max_lock_wait_ms: u64,
}

impl SqliteOutboxStore {
    pub fn new(pool: SqlitePool, config: &OutboxConfig) -> Self {
        Self {
            pool,
            max_attempts: config.max_attempts,
            max_error_len: config.max_error_len,
            max_lock_wait_ms: config.max_lock_wait_ms,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Enqueue in a transaction of its own, for events with no accompanying domain write
    pub async fn enqueue_standalone(&self, message: &NewOutboxMessage) -> Result<EnqueueOutcome> {
        retry_on_lock("outbox enqueue", self.max_lock_wait_ms, || async move {
            let mut tx = self.pool.begin().await?;
            let outcome = enqueue(&mut *tx, message).await?;
            tx.commit().await?;
            Ok(outcome)
        })
        .await
    }

    pub async fn get(&self, id: i64) -> Result<Option<OutboxMessage>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_MESSAGE))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| message_from_row(&r)).transpose()
    }

    /// Every row, ascending by id
    pub async fn all(&self) -> Result<Vec<OutboxMessage>> {
        let rows = sqlx::query(&format!("{} ORDER BY id", SELECT_MESSAGE))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(message_from_row).collect()
    }

    async fn current_status(&self, id: i64) -> Result<OutboxStatus> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM outbox_messages WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        match status {
            Some(status) => status.parse(),
            None => Err(Error::NotFound(format!("outbox message {}", id))),
        }
    }
}

const SELECT_MESSAGE: &str = r#"
    SELECT id, aggregate_type, aggregate_id, topic, event, scope, scope_key,
           idempotency_key, payload, occurred_at, status, attempts, last_error, processed_at
    FROM outbox_messages
"#;

fn message_from_row(row: &SqliteRow) -> Result<OutboxMessage> {
    let occurred_at: String = row.try_get("occurred_at")?;
    let processed_at: Option<String> = row.try_get("processed_at")?;
    let status: String = row.try_get("status")?;
    let attempts: i64 = row.try_get("attempts")?;

    Ok(OutboxMessage {
        id: row.try_get("id")?,
        aggregate_type: row.try_get("aggregate_type")?,
        aggregate_id: row.try_get("aggregate_id")?,
        topic: row.try_get("topic")?,
        event: row.try_get("event")?,
        scope: row.try_get("scope")?,
        scope_key: row.try_get("scope_key")?,
        idempotency_key: row.try_get("idempotency_key")?,
        payload: row.try_get("payload")?,
        occurred_at: parse_timestamp(&occurred_at)?,
        status: status.parse()?,
        attempts: attempts.max(0) as u32,
        last_error: row.try_get("last_error")?,
        processed_at: processed_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

#[async_trait]
impl OutboxStore for SqliteOutboxStore {
    async fn dequeue_batch(&self, batch_size: u32) -> Result<Vec<OutboxMessage>> {
        let rows = sqlx::query(&format!(
            r#"{}
            WHERE status IN ('pending', 'failed')
            ORDER BY CASE status WHEN 'pending' THEN 0 ELSE 1 END, occurred_at ASC, id ASC
            LIMIT ?"#,
            SELECT_MESSAGE
        ))
        .bind(batch_size as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }

    async fn mark_processed(&self, id: i64) -> Result<()> {
        let now = format_timestamp(&time::now());
        let now = now.as_str();
        let result = retry_on_lock("outbox mark processed", self.max_lock_wait_ms, || async move {
            Ok(sqlx::query(
                r#"
                UPDATE outbox_messages
                SET status = 'processed', processed_at = ?, updated_at = ?
                WHERE id = ? AND status IN ('pending', 'failed')
                "#,
            )
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?)
        })
        .await?;

        if result.rows_affected() == 0 {
            let status = self.current_status(id).await?;
            debug!(id, %status, "Outbox message already terminal; mark processed ignored");
        }
        Ok(())
    }

    async fn mark_failed(&self, id: i64, error: &str) -> Result<OutboxStatus> {
        let now = format_timestamp(&time::now());
        let now = now.as_str();
        let truncated = truncate_error(error, self.max_error_len);
        let error = truncated.as_str();
        let max_attempts = self.max_attempts as i64;

        let status: Option<String> =
            retry_on_lock("outbox mark failed", self.max_lock_wait_ms, || async move {
                Ok(sqlx::query_scalar(
                    r#"
                    UPDATE outbox_messages
                    SET attempts = attempts + 1,
                        last_error = ?,
                        updated_at = ?,
                        status = CASE
                            WHEN ? > 0 AND attempts + 1 >= ? THEN 'dead'
                            ELSE 'failed'
                        END
                    WHERE id = ? AND status IN ('pending', 'failed')
                    RETURNING status
                    "#,
                )
                .bind(error)
                .bind(now)
                .bind(max_attempts)
                .bind(max_attempts)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?)
            })
            .await?;

        match status {
            Some(status) => status.parse(),
            None => {
                let status = self.current_status(id).await?;
                debug!(id, %status, "Outbox message already terminal; mark failed ignored");
                Ok(status)
            }
        }
    }

    async fn status_counts(&self) -> Result<StatusCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM outbox_messages GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            let count = count.max(0) as u64;
            match status.parse()? {
                OutboxStatus::Pending => counts.pending = count,
                OutboxStatus::Processed => counts.processed = count,
                OutboxStatus::Failed => counts.failed = count,
                OutboxStatus::Dead => counts.dead = count,
            }
        }
        Ok(counts)
    }
}
