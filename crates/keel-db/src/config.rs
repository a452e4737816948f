//! # Manager Configuration
//!
//! Settings for entity managers.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     KEEL_MAX_IN_FLIGHT=8                                               │
//! │     KEEL_SLOW_FLUSH_MS=250                                             │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/keel/keel.toml (Linux)                                   │
//! │     ~/Library/Application Support/dev.keel.keel/keel.toml (macOS)      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     unbounded fan-out, slow-flush warning at 1000 ms                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # keel.toml
//! [flush]
//! max_in_flight = 0         # 0 = no limit per stage
//! slow_flush_warn_ms = 1000 # 0 = never warn
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ConfigError, ConfigResult};

// =============================================================================
// Flush Settings
// =============================================================================

/// How flush stages are driven.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushSettings {
    /// Maximum DataSource calls in flight within one stage.
    /// 0 means every call of the stage is started at once.
    #[serde(default)]
    pub max_in_flight: usize,

    /// Log a warning when a flush takes longer than this (milliseconds).
    /// 0 disables the warning. Nothing is ever cancelled.
    #[serde(default = "default_slow_flush_warn_ms")]
    pub slow_flush_warn_ms: u64,
}

fn default_slow_flush_warn_ms() -> u64 {
    1000
}

impl Default for FlushSettings {
    fn default() -> Self {
        FlushSettings {
            max_in_flight: 0,
            slow_flush_warn_ms: default_slow_flush_warn_ms(),
        }
    }
}

// =============================================================================
// Manager Configuration
// =============================================================================

/// Complete entity manager configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerConfig {
    #[serde(default)]
    pub flush: FlushSettings,
}

impl ManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-stage fan-out limit (0 = unbounded).
    pub fn max_in_flight(mut self, limit: usize) -> Self {
        self.flush.max_in_flight = limit;
        self
    }

    /// Sets the slow-flush warning threshold (zero disables it).
    pub fn slow_flush_warning(mut self, threshold: Duration) -> Self {
        self.flush.slow_flush_warn_ms = threshold.as_millis() as u64;
        self
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (keel.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> ConfigResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading manager config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load manager config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> ConfigResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or(ConfigError::NoConfigPath)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Manager config saved");
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(limit) = std::env::var("KEEL_MAX_IN_FLIGHT") {
            match limit.parse::<usize>() {
                Ok(parsed) => {
                    debug!(max_in_flight = parsed, "Overriding fan-out limit from environment");
                    self.flush.max_in_flight = parsed;
                }
                Err(_) => warn!(value = %limit, "Ignoring invalid KEEL_MAX_IN_FLIGHT"),
            }
        }

        if let Ok(ms) = std::env::var("KEEL_SLOW_FLUSH_MS") {
            match ms.parse::<u64>() {
                Ok(parsed) => self.flush.slow_flush_warn_ms = parsed,
                Err(_) => warn!(value = %ms, "Ignoring invalid KEEL_SLOW_FLUSH_MS"),
            }
        }
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "keel", "keel")
            .map(|dirs| dirs.config_dir().join("keel.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn fan_out(&self) -> usize {
        self.flush.max_in_flight
    }

    /// Slow-flush threshold, `None` when disabled.
    pub fn slow_flush_threshold(&self) -> Option<Duration> {
        match self.flush.slow_flush_warn_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ManagerConfig::default();
        assert_eq!(config.fan_out(), 0);
        assert_eq!(config.slow_flush_threshold(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_builder() {
        let config = ManagerConfig::new()
            .max_in_flight(4)
            .slow_flush_warning(Duration::ZERO);
        assert_eq!(config.fan_out(), 4);
        assert_eq!(config.slow_flush_threshold(), None);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: ManagerConfig = toml::from_str("[flush]\nmax_in_flight = 3\n").unwrap();
        assert_eq!(config.flush.max_in_flight, 3);
        assert_eq!(config.flush.slow_flush_warn_ms, 1000);

        let empty: ManagerConfig = toml::from_str("").unwrap();
        assert_eq!(empty, ManagerConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("keel.toml");

        let config = ManagerConfig::new().max_in_flight(6);
        config.save(Some(path.clone())).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[flush]"));

        let loaded = ManagerConfig::load(Some(path)).unwrap();
        if std::env::var("KEEL_MAX_IN_FLIGHT").is_err() {
            assert_eq!(loaded.flush.max_in_flight, 6);
        }
    }

    #[test]
    fn test_invalid_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keel.toml");
        std::fs::write(&path, "[flush]\nmax_in_flight = \"lots\"\n").unwrap();

        assert!(matches!(
            ManagerConfig::load(Some(path.clone())),
            Err(ConfigError::Parse(_))
        ));
        assert_eq!(
            ManagerConfig::load_or_default(Some(path)).flush.slow_flush_warn_ms,
            ManagerConfig::default().flush.slow_flush_warn_ms
        );
    }
}
