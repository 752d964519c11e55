//! Configuration for vigil-reid
//!
//! One TOML file with `[server]`, `[database]`, `[matching]`, `[tracking]`, `[outbox]`,
//! `[topology]` and `[logging]` sections. Every key has a compiled default, so an empty
//! or missing file yields a working service.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use vigil_common::config::{
    load_toml_or_default, ConfigResolver, DatabaseConfig, LoggingConfig, ServerConfig,
};
use vigil_common::{Error, Result};

/// Environment variable holding an explicit config file path
pub const CONFIG_ENV_VAR: &str = "VIGIL_CONFIG";

/// Config file name looked up in the platform config directory
pub const CONFIG_FILE_NAME: &str = "vigil-reid.toml";

/// Full service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReidConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub matching: MatchingConfig,
    pub tracking: TrackingConfig,
    pub outbox: OutboxConfig,
    pub topology: TopologySourceConfig,
    pub logging: LoggingConfig,
}

/// Similarity matcher parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Minimum cosine similarity for a gallery match
    pub default_threshold: f32,
    /// Per-camera overrides of `default_threshold` (camera ids are case-insensitive)
    pub camera_thresholds: HashMap<String, f32>,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            default_threshold: 0.6,
            camera_thresholds: HashMap::new(),
        }
    }
}

impl MatchingConfig {
    /// Threshold that applies to probes from `camera_id`
    pub fn threshold_for(&self, camera_id: &str) -> f32 {
        let wanted = camera_id.trim();
        self.camera_thresholds
            .iter()
            .find(|(camera, _)| camera.trim().eq_ignore_ascii_case(wanted))
            .map(|(_, threshold)| *threshold)
            .unwrap_or(self.default_threshold)
    }
}

/// Tracking engine parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Sessions idle longer than this are swept
    pub session_expiration_secs: u64,
    /// Same-camera lookup window
    pub same_camera_max_age_secs: u64,
    /// Same-camera lookup minimum mean similarity
    pub same_camera_similarity_threshold: f32,
    /// Cross-camera lookup window (edge weights may tighten it)
    pub cross_zone_max_travel_secs: u64,
    /// Cross-camera lookup minimum mean similarity
    pub cross_zone_similarity_threshold: f32,
    /// Similarity scores kept per session
    pub history_capacity: usize,
    /// Interval of the expiry sweep
    pub sweep_interval_secs: u64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            session_expiration_secs: 300,
            same_camera_max_age_secs: 10,
            same_camera_similarity_threshold: 0.6,
            cross_zone_max_travel_secs: 30,
            cross_zone_similarity_threshold: 0.6,
            history_capacity: 50,
            sweep_interval_secs: 30,
        }
    }
}

impl TrackingConfig {
    pub fn session_expiration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_expiration_secs as i64)
    }

    pub fn same_camera_max_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.same_camera_max_age_secs as i64)
    }

    pub fn cross_zone_max_travel(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cross_zone_max_travel_secs as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Outbox dispatcher parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    /// Rows drained per dispatcher pass
    pub batch_size: u32,
    /// Sleep after an empty pass
    pub idle_poll_ms: u64,
    /// Sleep after a pass that failed as a whole (store unavailable)
    pub error_backoff_ms: u64,
    /// Failed attempts before a row is dead-lettered; 0 retries forever
    pub max_attempts: u32,
    /// `last_error` is truncated to this many characters
    pub max_error_len: usize,
    /// How long a single outbox write may wait on a locked database
    pub max_lock_wait_ms: u64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            idle_poll_ms: 500,
            error_backoff_ms: 1000,
            max_attempts: 10,
            max_error_len: 1024,
            max_lock_wait_ms: 5000,
        }
    }
}

impl OutboxConfig {
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

/// Where the camera topology comes from
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologySourceConfig {
    /// Optional TOML file that seeds the topology tables at startup
    pub seed_file: Option<PathBuf>,
}

impl ReidConfig {
    /// Resolve and load the config file (CLI → `VIGIL_CONFIG` → platform dir → defaults)
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let resolver = ConfigResolver::new(CONFIG_FILE_NAME, CONFIG_ENV_VAR);
        let path = resolver.resolve(cli_path);
        let config: ReidConfig = load_toml_or_default(path.as_deref())?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        check_threshold("matching.default_threshold", self.matching.default_threshold)?;
        for (camera, threshold) in &self.matching.camera_thresholds {
            check_threshold(&format!("matching.camera_thresholds.{}", camera), *threshold)?;
        }
        check_threshold(
            "tracking.same_camera_similarity_threshold",
            self.tracking.same_camera_similarity_threshold,
        )?;
        check_threshold(
            "tracking.cross_zone_similarity_threshold",
            self.tracking.cross_zone_similarity_threshold,
        )?;

        let durations = [
            ("tracking.session_expiration_secs", self.tracking.session_expiration_secs),
            ("tracking.same_camera_max_age_secs", self.tracking.same_camera_max_age_secs),
            ("tracking.cross_zone_max_travel_secs", self.tracking.cross_zone_max_travel_secs),
            ("tracking.sweep_interval_secs", self.tracking.sweep_interval_secs),
            ("outbox.idle_poll_ms", self.outbox.idle_poll_ms),
            ("outbox.error_backoff_ms", self.outbox.error_backoff_ms),
        ];
        for (key, value) in durations {
            if value == 0 {
                return Err(Error::Config(format!("{} must be greater than zero", key)));
            }
        }

        if self.tracking.history_capacity == 0 {
            return Err(Error::Config("tracking.history_capacity must be at least 1".into()));
        }
        if self.outbox.batch_size == 0 {
            return Err(Error::Config("outbox.batch_size must be at least 1".into()));
        }
        if self.outbox.max_error_len == 0 {
            return Err(Error::Config("outbox.max_error_len must be at least 1".into()));
        }

        Ok(())
    }
}

fn check_threshold(key: &str, value: f32) -> Result<()> {
    if value.is_finite() && value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(Error::Config(format!("{} must be in (0, 1], got {}", key, value)))
    }
}
