//! Shared helpers for the re-identification service

pub mod db_retry;

pub use db_retry::retry_on_lock;
