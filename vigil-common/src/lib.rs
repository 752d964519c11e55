//! # Vigil Common Library
//!
//! Shared code for the Vigil monitoring services including:
//! - Error type and result alias
//! - Configuration loading (TOML + environment)
//! - SQLite initialization and schema
//! - Event taxonomy (topics, delivery scopes, push envelopes, EventBus)
//! - Clock abstraction for time-dependent logic

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
pub use time::{Clock, ManualClock, SystemClock};
