//! Configuration file resolution and loading
//!
//! Config path priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Platform config directory (`~/.config/vigil/<file>` on Linux, `/etc/vigil/<file>`)
//! 4. Compiled defaults (no file at all)
//!
//! A missing file is never fatal: a warning is logged and compiled defaults are used.
//! A file that exists but does not parse is a configuration error.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Logging configuration (`[logging]` section)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset (e.g. "info", "vigil_reid=debug")
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// HTTP listener configuration (`[server]` section)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5810,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Database location (`[database]` section)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Explicit database file; falls back to `<data dir>/vigil/vigil.db`
    pub path: Option<PathBuf>,
}

impl DatabaseConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(default_database_path)
    }
}

/// Resolves which config file (if any) a service should read
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    file_name: String,
    env_var: String,
}

impl ConfigResolver {
    /// `file_name` is looked up in the platform config dir; `env_var` may hold a full path
    pub fn new(file_name: impl Into<String>, env_var: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            env_var: env_var.into(),
        }
    }

    /// Resolve the config file path, or `None` when compiled defaults should be used
    pub fn resolve(&self, cli_arg: Option<&Path>) -> Option<PathBuf> {
        // Priority 1: Command-line argument
        if let Some(path) = cli_arg {
            return Some(path.to_path_buf());
        }

        // Priority 2: Environment variable
        if let Ok(path) = std::env::var(&self.env_var) {
            if !path.trim().is_empty() {
                return Some(PathBuf::from(path));
            }
        }

        // Priority 3: Platform config directory
        self.platform_candidates().into_iter().find(|p| p.exists())
    }

    fn platform_candidates(&self) -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        if let Some(dir) = dirs::config_dir() {
            candidates.push(dir.join("vigil").join(&self.file_name));
        }
        if cfg!(unix) {
            candidates.push(PathBuf::from("/etc/vigil").join(&self.file_name));
        }
        candidates
    }
}

/// Load a TOML config file, degrading to `T::default()` when the file is missing
pub fn load_toml_or_default<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        warn!("No config file found, using compiled defaults");
        return Ok(T::default());
    };

    if !path.exists() {
        warn!("Config file {} not found, using compiled defaults", path.display());
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Parse a TOML file that must exist (topology seed files, etc.)
pub fn load_toml_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// OS-dependent default database location
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("vigil"))
        .unwrap_or_else(|| PathBuf::from("./vigil_data"))
        .join("vigil.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    #[serde(default)]
    struct Sample {
        logging: LoggingConfig,
        server: ServerConfig,
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let path = PathBuf::from("/nonexistent/vigil/test.toml");
        let config: Sample = load_toml_or_default(Some(&path)).unwrap();
        assert_eq!(config, Sample::default());
    }

    #[test]
    fn test_no_path_uses_defaults() {
        let config: Sample = load_toml_or_default(None).unwrap();
        assert_eq!(config.server.port, 5810);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_cli_arg_wins() {
        let resolver = ConfigResolver::new("unit.toml", "VIGIL_UNIT_TEST_CONFIG_UNSET");
        let resolved = resolver.resolve(Some(Path::new("/tmp/explicit.toml")));
        assert_eq!(resolved, Some(PathBuf::from("/tmp/explicit.toml")));
    }

    #[test]
    fn test_server_bind_addr() {
        let server = ServerConfig {
            host: "0.0.0.0".into(),
            port: 9000,
        };
        assert_eq!(server.bind_addr(), "0.0.0.0:9000");
    }
}
