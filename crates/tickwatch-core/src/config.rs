//! Typed configuration sections owned by the core crate.
//!
//! The engine's `tickwatch-config.yaml` is split into sections; the ones
//! below configure components that live in this crate. Every field has a
//! default so a partial (or empty) file is valid.

use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        #[from]
        source: serde_yml::Error,
    },

    /// A value parsed but is not usable.
    #[error("invalid config value for '{field}': {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Detector polling behavior.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DetectorConfig {
    /// Read the HP pair on every Nth tick.
    #[serde(default = "default_hp_poll_interval")]
    pub hp_poll_interval: u64,

    /// Emit a debug trace of the player position periodically.
    #[serde(default)]
    pub debug: bool,

    /// Ticks between debug position traces when `debug` is on.
    #[serde(default = "default_debug_log_interval")]
    pub debug_log_interval: u64,
}

impl DetectorConfig {
    /// Reject values the detector cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a zero poll interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hp_poll_interval == 0 {
            return Err(ConfigError::Invalid {
                field: "detector.hp_poll_interval",
                reason: "must be at least 1".to_owned(),
            });
        }
        Ok(())
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            hp_poll_interval: default_hp_poll_interval(),
            debug: false,
            debug_log_interval: default_debug_log_interval(),
        }
    }
}

/// Command FIFO sizing and drain cadence.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommandConfig {
    /// Accept commands from stdin and drain them into the console.
    #[serde(default)]
    pub enabled: bool,

    /// Maximum queued commands before new ones are rejected.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Minimum ticks between two injected commands.
    #[serde(default = "default_ticks_per_command")]
    pub ticks_per_command: u32,

    /// How long each button is held, in ticks.
    #[serde(default = "default_hold_ticks")]
    pub hold_ticks: u32,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            capacity: default_capacity(),
            ticks_per_command: default_ticks_per_command(),
            hold_ticks: default_hold_ticks(),
        }
    }
}

/// Session boundaries and pacing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SessionConfig {
    /// Stop after this many ticks (0 = run until the console finishes).
    #[serde(default)]
    pub max_ticks: u64,

    /// Real-time milliseconds per tick (0 = as fast as the console goes).
    #[serde(default)]
    pub tick_interval_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

const fn default_hp_poll_interval() -> u64 {
    30
}

const fn default_debug_log_interval() -> u64 {
    60
}

const fn default_capacity() -> usize {
    100
}

const fn default_ticks_per_command() -> u32 {
    15
}

const fn default_hold_ticks() -> u32 {
    10
}

fn default_log_level() -> String {
    "info".to_owned()
}
