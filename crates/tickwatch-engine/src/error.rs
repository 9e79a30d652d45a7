//! Error types for the engine binary.
//!
//! [`EngineError`] is the top-level error type that wraps all possible
//! failure modes during engine startup and session execution.

/// Top-level error for the engine binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: tickwatch_core::config::ConfigError,
    },

    /// The console trace could not be loaded.
    #[error("trace error: {source}")]
    Trace {
        /// The underlying trace error.
        #[from]
        source: tickwatch_core::console::TraceError,
    },

    /// The broker could not be reached.
    #[error("broker error: {source}")]
    Broker {
        /// The underlying broker error.
        #[from]
        source: tickwatch_broker::BrokerError,
    },

    /// The session loop failed.
    #[error("session error: {source}")]
    Session {
        /// The underlying session error.
        #[from]
        source: tickwatch_core::session::SessionError,
    },
}
