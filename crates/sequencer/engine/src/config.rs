//! Engine configuration
//!
//! Loaded from TOML; every field has a default so an empty or missing file
//! yields a working engine.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on simultaneously live runs
    #[serde(default = "default_max_running")]
    pub max_running_sequences: usize,

    /// Scheduler ticks per second of `wait-after-action`
    #[serde(default = "default_ticks_per_second")]
    pub ticks_per_second: u64,

    /// Delay between `execute` and the first step
    #[serde(default = "default_one_tick")]
    pub first_step_delay_ticks: u64,

    /// Delay after a step without a wait
    #[serde(default = "default_one_tick")]
    pub min_step_delay_ticks: u64,

    /// Wall-clock length of one tick for the tokio scheduler
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_running_sequences: default_max_running(),
            ticks_per_second: default_ticks_per_second(),
            first_step_delay_ticks: default_one_tick(),
            min_step_delay_ticks: default_one_tick(),
            tick_millis: default_tick_millis(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_max_running() -> usize {
    100
}

fn default_ticks_per_second() -> u64 {
    20
}

fn default_one_tick() -> u64 {
    1
}

fn default_tick_millis() -> u64 {
    50
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Errors while loading an [`EngineConfig`]
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl EngineConfig {
    /// Load configuration from a TOML file; a missing file yields defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigLoadError> {
        let config = match path {
            Some(path) if path.exists() => {
                let contents = std::fs::read_to_string(path)?;
                Self::from_toml_str(&contents)?
            }
            _ => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigLoadError> {
        let config: EngineConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.max_running_sequences == 0 {
            return Err(ConfigLoadError::Invalid(
                "max_running_sequences must be at least 1".into(),
            ));
        }
        if self.ticks_per_second == 0 {
            return Err(ConfigLoadError::Invalid(
                "ticks_per_second must be at least 1".into(),
            ));
        }
        if self.tick_millis == 0 {
            return Err(ConfigLoadError::Invalid("tick_millis must be at least 1".into()));
        }
        Ok(())
    }

    /// Ticks to wait after a step whose `wait-after-action` is `wait_secs`
    ///
    /// Never zero: a step without a wait still yields for one tick.
    pub fn step_delay_ticks(&self, wait_secs: u64) -> u64 {
        let minimum = self.min_step_delay_ticks.max(1);
        if wait_secs == 0 {
            minimum
        } else {
            wait_secs.saturating_mul(self.ticks_per_second).max(minimum)
        }
    }

    pub fn first_step_delay(&self) -> u64 {
        self.first_step_delay_ticks.max(1)
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }

    pub fn with_max_running(mut self, max: usize) -> Self {
        self.max_running_sequences = max;
        self
    }

    pub fn with_ticks_per_second(mut self, ticks: u64) -> Self {
        self.ticks_per_second = ticks;
        self
    }
}
