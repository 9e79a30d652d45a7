//! Engine configuration loaded from `tickwatch-config.yaml`.
//!
//! Sections owned by other crates are reused as-is; this module only adds
//! the engine's own choices (which bus, which trace) and the file loader.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tickwatch_broker::BrokerConfig;
use tickwatch_core::config::{
    CommandConfig, ConfigError, DetectorConfig, LoggingConfig, SessionConfig,
};

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "tickwatch-config.yaml";

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Session bounds and pacing.
    #[serde(default)]
    pub session: SessionConfig,

    /// Detector polling.
    #[serde(default)]
    pub detector: DetectorConfig,

    /// Command FIFO.
    #[serde(default)]
    pub commands: CommandConfig,

    /// Which event bus to publish on.
    #[serde(default)]
    pub bus: BusConfig,

    /// Broker settings, used when `bus.kind` is `nats`.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Console trace to replay.
    #[serde(default)]
    pub trace: TraceConfig,

    /// Logging.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load configuration from a YAML file, then apply env overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if it is malformed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string, then apply env overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes as null, not as an empty mapping.
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides for deployment.
    ///
    /// `NATS_URL` and `TICKWATCH_GROUP` go to the broker section;
    /// `TICKWATCH_TRACE` replaces the trace path.
    pub fn apply_env_overrides(&mut self) {
        self.broker.apply_env_overrides();
        if let Ok(val) = std::env::var("TICKWATCH_TRACE") {
            self.trace.path = PathBuf::from(val);
        }
    }

    /// Check values that parse but cannot be used.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.detector.validate()?;
        if self.commands.enabled && self.commands.ticks_per_command == 0 {
            return Err(ConfigError::Invalid {
                field: "commands.ticks_per_command",
                reason: "must be at least 1".to_owned(),
            });
        }
        Ok(())
    }
}

/// Event bus selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct BusConfig {
    /// Local (in-process) or NATS (distributed).
    #[serde(default)]
    pub kind: BusKind,
}

/// Which [`EventBus`](tickwatch_bus::EventBus) implementation to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusKind {
    /// Synchronous fan-out inside the engine process.
    #[default]
    Local,
    /// NATS `JetStream`; subscribers run in processor processes.
    Nats,
}

/// Console trace location.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TraceConfig {
    /// Path to the YAML trace file.
    #[serde(default = "default_trace_path")]
    pub path: PathBuf,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            path: default_trace_path(),
        }
    }
}

fn default_trace_path() -> PathBuf {
    PathBuf::from("traces/demo.yaml")
}

/// Load `tickwatch-config.yaml` from the working directory, or defaults.
///
/// Returns the config and whether the file was found.
pub fn load_config() -> Result<(EngineConfig, bool), ConfigError> {
    let config_path = Path::new(CONFIG_FILE);
    if config_path.exists() {
        Ok((EngineConfig::from_file(config_path)?, true))
    } else {
        let mut config = EngineConfig::default();
        config.apply_env_overrides();
        Ok((config, false))
    }
}
