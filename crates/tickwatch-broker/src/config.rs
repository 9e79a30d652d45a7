//! Broker connection and routing settings.
//!
//! This is the `broker:` section of `tickwatch-config.yaml`. The engine
//! deserializes it from the file; the processor builds it from environment
//! variables with [`BrokerConfig::from_env`].

use std::time::Duration;

use serde::Deserialize;

/// How a process attaches to the stream for each event type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueBinding {
    /// Every subscribing process gets its own ephemeral consumer and sees
    /// every event. The consumer is removed by the server once idle.
    Broadcast,
    /// Processes sharing a group pull from one durable consumer named
    /// `<group>_<event type>`, so each event goes to one of them.
    Shared {
        /// Consumer group name.
        group: String,
    },
}

/// Binding mode as written in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingMode {
    /// See [`QueueBinding::Broadcast`].
    #[default]
    Broadcast,
    /// See [`QueueBinding::Shared`].
    Shared,
}

/// Settings for [`NatsBus`](crate::NatsBus).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BrokerConfig {
    /// NATS server URL. Overridden by `NATS_URL`.
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// `JetStream` stream holding every event.
    #[serde(default = "default_stream")]
    pub stream: String,

    /// Subject prefix; events go to `<prefix>.<event type>`.
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,

    /// Connection attempts before giving up.
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,

    /// Delay between connection attempts.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Deliveries of one message before it is terminated.
    #[serde(default = "default_max_deliver")]
    pub max_deliver: i64,

    /// Broadcast or shared consumption.
    #[serde(default)]
    pub binding: BindingMode,

    /// Group name used with the shared binding. Overridden by
    /// `TICKWATCH_GROUP`.
    #[serde(default = "default_group")]
    pub group: String,

    /// How long `close()` waits for each consumption task.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    /// Idle time after which the server drops a broadcast consumer.
    #[serde(default = "default_inactive_threshold_secs")]
    pub inactive_threshold_secs: u64,
}

impl BrokerConfig {
    /// Apply environment variable overrides for deployment.
    ///
    /// Checks `NATS_URL` and `TICKWATCH_GROUP`; when set they replace the
    /// values loaded from YAML.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("NATS_URL") {
            self.nats_url = val;
        }
        if let Ok(val) = std::env::var("TICKWATCH_GROUP") {
            self.group = val;
        }
    }

    /// Build a configuration from defaults plus environment variables.
    ///
    /// Reads `NATS_URL`, `TICKWATCH_GROUP`, and `TICKWATCH_BINDING`
    /// (`broadcast` or `shared`). Unknown binding values fall back to
    /// broadcast.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        if let Ok(val) = std::env::var("TICKWATCH_BINDING") {
            config.binding = parse_binding(&val);
        }
        config
    }

    /// The binding strategy with its group resolved.
    pub fn queue_binding(&self) -> QueueBinding {
        match self.binding {
            BindingMode::Broadcast => QueueBinding::Broadcast,
            BindingMode::Shared => QueueBinding::Shared {
                group: self.group.clone(),
            },
        }
    }

    /// Delay between connection attempts.
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Per-task wait in `close()`.
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Idle threshold for broadcast consumers.
    pub const fn inactive_threshold(&self) -> Duration {
        Duration::from_secs(self.inactive_threshold_secs)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            nats_url: default_nats_url(),
            stream: default_stream(),
            subject_prefix: default_subject_prefix(),
            connect_attempts: default_connect_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            max_deliver: default_max_deliver(),
            binding: BindingMode::default(),
            group: default_group(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            inactive_threshold_secs: default_inactive_threshold_secs(),
        }
    }
}

fn parse_binding(value: &str) -> BindingMode {
    if value.trim().eq_ignore_ascii_case("shared") {
        BindingMode::Shared
    } else {
        BindingMode::Broadcast
    }
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_owned()
}

fn default_stream() -> String {
    "TICKWATCH_EVENTS".to_owned()
}

fn default_subject_prefix() -> String {
    "tickwatch.events".to_owned()
}

const fn default_connect_attempts() -> u32 {
    5
}

const fn default_retry_delay_ms() -> u64 {
    2000
}

const fn default_max_deliver() -> i64 {
    5
}

fn default_group() -> String {
    "tickwatch".to_owned()
}

const fn default_shutdown_timeout_ms() -> u64 {
    5000
}

const fn default_inactive_threshold_secs() -> u64 {
    300
}
