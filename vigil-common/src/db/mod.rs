//! Database initialization and shared column helpers

pub mod init;

pub use init::*;

use crate::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};

/// Format a timestamp for a TEXT column
///
/// Fixed microsecond precision with a `Z` suffix so that lexical order of the stored
/// strings equals chronological order (`ORDER BY occurred_at` relies on this).
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a timestamp written by [`format_timestamp`] (any RFC 3339 form is accepted)
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse timestamp '{}': {}", raw, e)))
}
