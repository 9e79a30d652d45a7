//! Error types for the event processor.

use tickwatch_types::EventType;

/// Errors that can stop the processor.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    /// Configuration is invalid.
    #[error("config error: {0}")]
    Config(String),

    /// The broker could not be reached or refused a subscription.
    #[error("broker error: {source}")]
    Broker {
        /// The underlying broker error.
        #[from]
        source: tickwatch_broker::BrokerError,
    },

    /// A consumer stopped after startup and no longer delivers events.
    #[error("consumers stopped for {event_types:?}")]
    ConsumerLost {
        /// Event types left without a live consumer.
        event_types: Vec<EventType>,
    },
}
