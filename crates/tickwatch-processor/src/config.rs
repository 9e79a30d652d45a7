//! Configuration types for the event processor.
//!
//! All configuration is loaded from environment variables. The processor
//! needs to know how to reach NATS, how to bind its consumers, and which
//! event types to consume.

use std::time::Duration;

use tickwatch_broker::BrokerConfig;
use tickwatch_types::EventType;

use crate::error::ProcessorError;

/// Complete processor configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Broker connection and binding.
    pub broker: BrokerConfig,
    /// Event types to consume.
    pub event_types: Vec<EventType>,
    /// How often to log the running tally; `None` logs only at shutdown.
    pub summary_interval: Option<Duration>,
}

impl ProcessorConfig {
    /// Load configuration from environment variables.
    ///
    /// All variables are optional:
    /// - `NATS_URL` -- NATS server connection string (default `nats://localhost:4222`)
    /// - `TICKWATCH_GROUP` -- consumer group for the shared binding (default `tickwatch`)
    /// - `TICKWATCH_BINDING` -- `broadcast` or `shared` (default `broadcast`)
    /// - `TICKWATCH_EVENTS` -- comma-separated wire names (default all types)
    /// - `SUMMARY_INTERVAL_SECS` -- periodic tally log, 0 disables (default 60)
    ///
    /// # Errors
    ///
    /// Returns [`ProcessorError::Config`] if a variable is set but invalid.
    pub fn from_env() -> Result<Self, ProcessorError> {
        let broker = BrokerConfig::from_env();

        let event_types = match std::env::var("TICKWATCH_EVENTS") {
            Ok(list) => parse_event_types(&list)?,
            Err(_) => EventType::ALL.to_vec(),
        };

        let summary_secs: u64 = std::env::var("SUMMARY_INTERVAL_SECS")
            .unwrap_or_else(|_| "60".to_owned())
            .parse()
            .map_err(|e| ProcessorError::Config(format!("invalid SUMMARY_INTERVAL_SECS: {e}")))?;

        Ok(Self {
            broker,
            event_types,
            summary_interval: (summary_secs > 0).then_some(Duration::from_secs(summary_secs)),
        })
    }
}

/// Parse a comma-separated list of event wire names.
///
/// Blank entries are skipped and duplicates collapse; an empty result is an
/// error since the processor would have nothing to do.
///
/// # Errors
///
/// Returns [`ProcessorError::Config`] for unknown names or an empty list.
pub fn parse_event_types(list: &str) -> Result<Vec<EventType>, ProcessorError> {
    let mut event_types = Vec::new();
    for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let event_type: EventType = name
            .parse()
            .map_err(|e| ProcessorError::Config(format!("invalid TICKWATCH_EVENTS: {e}")))?;
        if !event_types.contains(&event_type) {
            event_types.push(event_type);
        }
    }
    if event_types.is_empty() {
        return Err(ProcessorError::Config(
            "TICKWATCH_EVENTS names no event types".to_owned(),
        ));
    }
    Ok(event_types)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn event_list_parses_in_order() {
        let parsed = parse_event_types("battle_start, step ,battle_end").unwrap();
        assert_eq!(
            parsed,
            vec![EventType::BattleStart, EventType::Step, EventType::BattleEnd]
        );
    }

    #[test]
    fn duplicates_and_blanks_collapse() {
        let parsed = parse_event_types("step,,step, ").unwrap();
        assert_eq!(parsed, vec![EventType::Step]);
    }

    #[test]
    fn unknown_name_is_rejected() {
        let err = parse_event_types("step,teleport").unwrap_err();
        assert!(err.to_string().contains("teleport"));
    }

    #[test]
    fn empty_list_is_rejected() {
        assert!(matches!(
            parse_event_types(" , "),
            Err(ProcessorError::Config(_))
        ));
    }
}
