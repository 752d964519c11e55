//! Outbox row types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use vigil_common::events::{Scope, Topic};
use vigil_common::{Error, Result};

/// Delivery state of an outbox row
///
/// `Pending` and `Failed` are eligible for dispatch. `Processed` and `Dead` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    Pending,
    Processed,
    Failed,
    Dead,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Processed => "processed",
            OutboxStatus::Failed => "failed",
            OutboxStatus::Dead => "dead",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OutboxStatus::Processed | OutboxStatus::Dead)
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(OutboxStatus::Pending),
            "processed" => Ok(OutboxStatus::Processed),
            "failed" => Ok(OutboxStatus::Failed),
            "dead" => Ok(OutboxStatus::Dead),
            other => Err(Error::Internal(format!("Unknown outbox status '{}'", other))),
        }
    }
}

/// Event to be written to the outbox
#[derive(Debug, Clone, PartialEq)]
pub struct NewOutboxMessage {
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub topic: Topic,
    pub event: String,
    pub scope: Scope,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
    pub idempotency_key: Option<String>,
}

impl NewOutboxMessage {
    /// Serialize `payload` into a new message stamped with the current time
    pub fn new<P: Serialize>(
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        topic: Topic,
        event: impl Into<String>,
        scope: Scope,
        payload: &P,
    ) -> Result<Self> {
        Ok(Self {
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
            topic,
            event: event.into(),
            scope,
            payload: serde_json::to_value(payload)?,
            occurred_at: vigil_common::time::now(),
            idempotency_key: None,
        })
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = at;
        self
    }
}

/// Result of an enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// New row written with this id
    Inserted(i64),
    /// A row with the same idempotency key already exists; nothing written
    Duplicate,
}

impl EnqueueOutcome {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, EnqueueOutcome::Duplicate)
    }
}

/// Stored outbox row
///
/// Routing columns are kept as stored text; the dispatcher decodes them per message so
/// that one malformed row fails on its own instead of failing the whole batch read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboxMessage {
    pub id: i64,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub topic: String,
    pub event: String,
    pub scope: String,
    pub scope_key: Option<String>,
    pub idempotency_key: Option<String>,
    pub payload: String,
    pub occurred_at: DateTime<Utc>,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl OutboxMessage {
    pub fn decode_topic(&self) -> Result<Topic> {
        self.topic.parse()
    }

    pub fn decode_scope(&self) -> Result<Scope> {
        Scope::from_parts(&self.scope, self.scope_key.as_deref())
    }

    pub fn decode_payload(&self) -> Result<serde_json::Value> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

/// Row counts per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub processed: u64,
    pub failed: u64,
    pub dead: u64,
}

impl StatusCounts {
    /// Rows the dispatcher will still pick up
    pub fn backlog(&self) -> u64 {
        self.pending + self.failed
    }
}
