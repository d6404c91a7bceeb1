//! Coordination settings.
//!
//! Every field has a default so an empty TOML document is a valid
//! configuration.

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid setting '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Wait defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct WaitSettings {
    /// Upper bound for step/continue/breakpoint waits.
    pub default_timeout_ms: u64,
    /// Per-subscriber message buffer of each tracker.
    pub tracker_capacity: usize,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            default_timeout_ms: 10_000,
            tracker_capacity: crate::tracker::DEFAULT_CAPACITY,
        }
    }
}

/// Thread probing depth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ThreadSettings {
    /// Frames requested when probing a candidate thread.
    pub probe_depth: u32,
    /// Frames requested for the winning thread; 0 asks for all.
    pub full_depth: u32,
}

impl Default for ThreadSettings {
    fn default() -> Self {
        Self {
            probe_depth: 1,
            full_depth: 20,
        }
    }
}

/// Discovery quiescence settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct DiscoverySettings {
    pub timeout_ms: u64,
    pub quiet_window_ms: u64,
    pub min_items: usize,
    pub poll_interval_ms: u64,
    /// Upper bound for each nudge command.
    pub nudge_timeout_ms: u64,
    /// Producer commands tried in order until one succeeds.
    pub nudge_commands: Vec<String>,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            quiet_window_ms: 500,
            min_items: 1,
            poll_interval_ms: 50,
            nudge_timeout_ms: 2_000,
            nudge_commands: vec![
                "testing.refreshTests".to_string(),
                "testing.reloadTests".to_string(),
            ],
        }
    }
}

/// Top-level coordination configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    pub wait: WaitSettings,
    pub threads: ThreadSettings,
    pub discovery: DiscoverySettings,
}

impl CoordinationConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    /// Returns error if the document is not valid TOML or a value is out of range.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or fails validation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Check value ranges.
    ///
    /// # Errors
    /// Returns the first out-of-range field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("wait.default_timeout_ms", self.wait.default_timeout_ms),
            ("discovery.timeout_ms", self.discovery.timeout_ms),
            ("discovery.poll_interval_ms", self.discovery.poll_interval_ms),
            ("discovery.nudge_timeout_ms", self.discovery.nudge_timeout_ms),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.wait.tracker_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "wait.tracker_capacity",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.threads.probe_depth == 0 {
            return Err(ConfigError::Invalid {
                field: "threads.probe_depth",
                reason: "must request at least one frame".to_string(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.wait.default_timeout_ms)
    }
}

impl DiscoverySettings {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    #[must_use]
    pub const fn quiet_window(&self) -> Duration {
        Duration::from_millis(self.quiet_window_ms)
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub const fn nudge_timeout(&self) -> Duration {
        Duration::from_millis(self.nudge_timeout_ms)
    }
}
