//! Event distribution contract for Tickwatch.
//!
//! The detector publishes through the [`EventBus`] trait and never knows
//! which implementation sits behind it. Two implementations exist:
//!
//! - [`LocalBus`] (this crate) -- synchronous fan-out inside one process.
//! - `NatsBus` (`tickwatch-broker`) -- forwards through a NATS `JetStream`
//!   stream so subscribers can live in other processes.
//!
//! # Failure isolation differs between implementations
//!
//! [`LocalBus`] does **not** isolate handlers: the first handler that
//! returns an error aborts delivery and the error comes back out of
//! [`EventBus::publish`]. The broker-backed bus isolates each handler and
//! only logs failures. Tests written against one implementation must not
//! assume the other's behavior.

pub mod local;

use std::sync::Arc;

use tickwatch_types::{EventPayload, EventType, Payload};

pub use local::LocalBus;

/// A subscriber callback.
///
/// Handlers are compared by `Arc` identity, so keep a clone of the handle
/// you subscribed with if you intend to unsubscribe it later.
pub type Handler = Arc<dyn Fn(&Payload) -> Result<(), HandlerError> + Send + Sync>;

/// Wrap a closure as a [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&Payload) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Failure reported by a subscriber callback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    /// Create a handler error from anything printable.
    pub fn new(message: impl core::fmt::Display) -> Self {
        Self {
            message: message.to_string(),
        }
    }

    /// The failure description.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(format!("payload decode failed: {e}"))
    }
}

/// Errors surfaced by [`EventBus::publish`].
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// An in-process handler failed and delivery was aborted.
    #[error("handler for '{event_type}' failed: {source}")]
    Handler {
        /// The event being delivered.
        event_type: EventType,
        /// What the handler reported.
        #[source]
        source: HandlerError,
    },

    /// The typed payload could not be turned into a JSON object.
    #[error("failed to encode '{event_type}' payload: {source}")]
    Encode {
        /// The event being encoded.
        event_type: EventType,
        /// The underlying serializer error.
        #[source]
        source: serde_json::Error,
    },

    /// The broker did not accept the message.
    #[error("failed to publish '{event_type}': {message}")]
    Publish {
        /// The event being published.
        event_type: EventType,
        /// Description of the broker failure.
        message: String,
    },
}

/// Publish/subscribe contract shared by every bus implementation.
///
/// All methods take `&self`; implementations use interior mutability so a
/// bus can be shared behind an `Arc` between the driving loop and the
/// threads that register subscribers.
pub trait EventBus: Send + Sync {
    /// Register `handler` for `event_type`. Duplicates are kept.
    fn subscribe(&self, event_type: EventType, handler: Handler);

    /// Remove the first registration of `handler` for `event_type`.
    ///
    /// Does nothing when the handler is not registered.
    fn unsubscribe(&self, event_type: EventType, handler: &Handler);

    /// Deliver `payload` to the subscribers of `event_type`.
    ///
    /// # Errors
    ///
    /// See the implementation for which failures are reported here.
    fn publish(&self, event_type: EventType, payload: Payload) -> Result<(), BusError>;

    /// Drop every registered handler.
    fn clear(&self);
}

/// Encode a typed payload and publish it under its own event type.
///
/// # Errors
///
/// Returns [`BusError::Encode`] when the payload cannot be serialized, or
/// whatever the bus returns from [`EventBus::publish`].
pub fn publish_event<B, P>(bus: &B, event: &P) -> Result<(), BusError>
where
    B: EventBus + ?Sized,
    P: EventPayload,
{
    let payload = event.to_payload().map_err(|source| BusError::Encode {
        event_type: P::EVENT_TYPE,
        source,
    })?;
    bus.publish(P::EVENT_TYPE, payload)
}
