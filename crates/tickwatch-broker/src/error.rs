//! Error types for the broker-backed bus.
//!
//! async-nats exposes a separate error type per operation; they are
//! flattened into messages here the same way the rest of the workspace
//! reports NATS failures.

/// Errors that can occur while talking to the NATS server.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The server could not be reached after every retry.
    #[error(
        "NATS unavailable at {url} after {attempts} attempts: {message} \
         (is the NATS server running?)"
    )]
    Unavailable {
        /// The URL that was tried.
        url: String,
        /// How many connection attempts were made.
        attempts: u32,
        /// The last connection error.
        message: String,
    },

    /// The event stream could not be created or looked up.
    #[error("stream '{stream}' error: {message}")]
    Stream {
        /// Stream name.
        stream: String,
        /// Description of the failure.
        message: String,
    },

    /// A consumer could not be created or read from.
    #[error("consumer for '{subject}' error: {message}")]
    Consumer {
        /// The filter subject of the consumer.
        subject: String,
        /// Description of the failure.
        message: String,
    },

    /// The server rejected or never acknowledged a publish.
    #[error("publish to '{subject}' failed: {message}")]
    Publish {
        /// The subject published to.
        subject: String,
        /// Description of the failure.
        message: String,
    },

    /// A payload could not be serialized.
    #[error("payload encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// No Tokio runtime was available to drive the client.
    #[error("tokio runtime error: {0}")]
    Runtime(String),
}
