//! Supervisor configuration loading and validation.
//!
//! Configuration comes from three layers, later layers winning:
//! built-in defaults, an optional `loopguard.toml` in the project
//! directory, and environment variables (`MAX_CALLS_PER_HOUR`,
//! `MAX_CONSECUTIVE_TEST_LOOPS`, `MAX_CONSECUTIVE_DONE_SIGNALS`,
//! `AGENT_TIMEOUT_SECS`).
//!
//! The no-progress thresholds (2 warning / 3 halt) and the same-error
//! threshold (5) are configurable but their defaults are contracts the
//! state machine tests pin down.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{LoopguardError, Result};

/// Config file name looked up in the project directory.
pub const CONFIG_FILENAME: &str = "loopguard.toml";

/// Supervisor configuration.
///
/// # Example
///
/// ```
/// use loopguard::config::SupervisorConfig;
///
/// let config = SupervisorConfig::default();
/// assert_eq!(config.max_consecutive_test_loops, 3);
/// assert_eq!(config.max_consecutive_done_signals, 2);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupervisorConfig {
    /// Hourly agent invocation budget (rate-limit guard, independent of
    /// the circuit breaker).
    #[serde(default = "default_max_calls_per_hour")]
    pub max_calls_per_hour: u32,

    /// Consecutive test-only loops before recommending a voluntary stop.
    #[serde(default = "default_max_test_loops")]
    pub max_consecutive_test_loops: u32,

    /// Recent done signals before recommending a voluntary stop.
    #[serde(default = "default_max_done_signals")]
    pub max_consecutive_done_signals: u32,

    /// No-progress iterations before the breaker enters the warning state.
    #[serde(default = "default_no_progress_warn")]
    pub no_progress_warn_threshold: u32,

    /// No-progress iterations before the breaker opens.
    #[serde(default = "default_no_progress_halt")]
    pub no_progress_halt_threshold: u32,

    /// Identical-error iterations before the breaker opens.
    #[serde(default = "default_same_error_halt")]
    pub same_error_halt_threshold: u32,

    /// Maximum loop iterations before giving up.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Deadline for one agent invocation, in seconds.
    #[serde(default = "default_agent_timeout_secs")]
    pub agent_timeout_secs: u64,

    /// Capacity of each exit-signal rolling window.
    #[serde(default = "default_window_capacity")]
    pub signal_window_capacity: usize,
}

fn default_max_calls_per_hour() -> u32 {
    60
}

fn default_max_test_loops() -> u32 {
    3
}

fn default_max_done_signals() -> u32 {
    2
}

fn default_no_progress_warn() -> u32 {
    2
}

fn default_no_progress_halt() -> u32 {
    3
}

fn default_same_error_halt() -> u32 {
    5
}

fn default_max_iterations() -> u32 {
    50
}

fn default_agent_timeout_secs() -> u64 {
    3600
}

fn default_window_capacity() -> usize {
    5
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_calls_per_hour: default_max_calls_per_hour(),
            max_consecutive_test_loops: default_max_test_loops(),
            max_consecutive_done_signals: default_max_done_signals(),
            no_progress_warn_threshold: default_no_progress_warn(),
            no_progress_halt_threshold: default_no_progress_halt(),
            same_error_halt_threshold: default_same_error_halt(),
            max_iterations: default_max_iterations(),
            agent_timeout_secs: default_agent_timeout_secs(),
            signal_window_capacity: default_window_capacity(),
        }
    }
}

impl SupervisorConfig {
    /// Load configuration for a project directory.
    ///
    /// Reads `loopguard.toml` when present, then applies environment
    /// overrides. A missing config file is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the resulting configuration fails validation.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let path = Self::config_path(project_dir);

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            toml::from_str(&content).map_err(|e| {
                LoopguardError::config_with_path(format!("failed to parse: {}", e), path.clone())
            })?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Path to the config file for a project.
    #[must_use]
    pub fn config_path(project_dir: &Path) -> PathBuf {
        project_dir.join(CONFIG_FILENAME)
    }

    /// Apply recognized environment variable overrides in place.
    pub fn apply_env_overrides(&mut self) {
        apply_env_u32("MAX_CALLS_PER_HOUR", &mut self.max_calls_per_hour);
        apply_env_u32(
            "MAX_CONSECUTIVE_TEST_LOOPS",
            &mut self.max_consecutive_test_loops,
        );
        apply_env_u32(
            "MAX_CONSECUTIVE_DONE_SIGNALS",
            &mut self.max_consecutive_done_signals,
        );
        apply_env_u64("AGENT_TIMEOUT_SECS", &mut self.agent_timeout_secs);
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`LoopguardError::InvalidConfig`] naming the offending
    /// field.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("max_calls_per_hour", self.max_calls_per_hour),
            (
                "max_consecutive_test_loops",
                self.max_consecutive_test_loops,
            ),
            (
                "max_consecutive_done_signals",
                self.max_consecutive_done_signals,
            ),
            (
                "no_progress_warn_threshold",
                self.no_progress_warn_threshold,
            ),
            (
                "no_progress_halt_threshold",
                self.no_progress_halt_threshold,
            ),
            ("same_error_halt_threshold", self.same_error_halt_threshold),
            ("max_iterations", self.max_iterations),
        ];

        for (field, value) in positive {
            if value == 0 {
                return Err(LoopguardError::InvalidConfig {
                    field: field.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        if self.no_progress_warn_threshold >= self.no_progress_halt_threshold {
            return Err(LoopguardError::InvalidConfig {
                field: "no_progress_warn_threshold".to_string(),
                reason: format!(
                    "warning threshold ({}) must be below halt threshold ({})",
                    self.no_progress_warn_threshold, self.no_progress_halt_threshold
                ),
            });
        }

        if self.agent_timeout_secs == 0 {
            return Err(LoopguardError::InvalidConfig {
                field: "agent_timeout_secs".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.signal_window_capacity == 0 {
            return Err(LoopguardError::InvalidConfig {
                field: "signal_window_capacity".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

fn apply_env_u32(name: &str, target: &mut u32) {
    if let Ok(raw) = std::env::var(name) {
        match raw.parse::<u32>() {
            Ok(value) => *target = value,
            Err(_) => warn!("Ignoring {}: '{}' is not a valid number", name, raw),
        }
    }
}

fn apply_env_u64(name: &str, target: &mut u64) {
    if let Ok(raw) = std::env::var(name) {
        match raw.parse::<u64>() {
            Ok(value) => *target = value,
            Err(_) => warn!("Ignoring {}: '{}' is not a valid number", name, raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_thresholds() {
        let config = SupervisorConfig::default();
        assert_eq!(config.max_consecutive_test_loops, 3);
        assert_eq!(config.max_consecutive_done_signals, 2);
        assert_eq!(config.no_progress_warn_threshold, 2);
        assert_eq!(config.no_progress_halt_threshold, 3);
        assert_eq!(config.same_error_halt_threshold, 5);
        assert_eq!(config.signal_window_capacity, 5);
    }

    #[test]
    fn test_load_from_toml() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(CONFIG_FILENAME),
            "max_iterations = 10\nmax_calls_per_hour = 20\n",
        )
        .unwrap();

        let config = SupervisorConfig::load(temp.path()).expect("load");
        assert_eq!(config.max_iterations, 10);
        assert_eq!(config.max_calls_per_hour, 20);
        // Unspecified fields keep their defaults
        assert_eq!(config.no_progress_halt_threshold, 3);
    }

    #[test]
    fn test_load_rejects_malformed_toml() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(CONFIG_FILENAME), "max_iterations = [[").unwrap();

        let result = SupervisorConfig::load(temp.path());
        assert!(matches!(result, Err(LoopguardError::Config { .. })));
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let config = SupervisorConfig {
            max_iterations: 0,
            ..SupervisorConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_iterations"));
    }

    #[test]
    fn test_validate_requires_warn_below_halt() {
        let config = SupervisorConfig {
            no_progress_warn_threshold: 3,
            no_progress_halt_threshold: 3,
            ..SupervisorConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("no_progress_warn_threshold"));
    }

    #[test]
    fn test_validate_default_is_valid() {
        assert!(SupervisorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = SupervisorConfig::default();
        let serialized = toml::to_string(&config).unwrap();
        let restored: SupervisorConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(restored, config);
    }
}
